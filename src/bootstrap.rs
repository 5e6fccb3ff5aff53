//! Destination collection setup

use crate::error::{Error, Result};
use crate::store::VectorStore;
use tracing::{debug, info};

/// What `ensure_collection` had to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub created: bool,
    pub indexes_created: Vec<String>,
}

/// Make sure `name` exists with `vector_size` and keyword indexes on `indexed_fields`.
///
/// The store is health-checked first; an unreachable store or an existing
/// collection with an incompatible vector layout is an error.
pub async fn ensure_collection(
    store: &dyn VectorStore,
    name: &str,
    vector_size: u64,
    indexed_fields: &[&str],
) -> Result<BootstrapReport> {
    store.health_check().await?;

    let mut report = BootstrapReport::default();

    let existing_indexes = match store.describe_collection(name).await? {
        None => {
            info!(
                "Creating collection '{}' (vector size {}, cosine)",
                name, vector_size
            );
            store.create_collection(name, vector_size).await?;
            report.created = true;
            Vec::new()
        }
        Some(descriptor) => {
            match descriptor.vector_sizes.as_slice() {
                [(_, size)] if *size == vector_size => {}
                [(_, size)] => {
                    return Err(Error::Config(format!(
                        "Collection '{}' has vector size {}, but this run embeds with size {}",
                        name, size, vector_size
                    )));
                }
                other => {
                    let names: Vec<&str> = other.iter().map(|(n, _)| n.as_str()).collect();
                    return Err(Error::Config(format!(
                        "Collection '{}' uses named vectors ({}); a single unnamed vector is required",
                        name,
                        names.join(", ")
                    )));
                }
            }
            debug!(
                "Collection '{}' exists with {} points",
                name, descriptor.points_count
            );
            descriptor.indexed_fields
        }
    };

    for field in indexed_fields {
        if existing_indexes.iter().any(|f| f == field) {
            continue;
        }
        store.create_keyword_index(name, field).await?;
        report.indexes_created.push(field.to_string());
    }

    if !report.indexes_created.is_empty() {
        debug!(
            "Created payload indexes on '{}': {}",
            name,
            report.indexes_created.join(", ")
        );
    }

    Ok(report)
}
