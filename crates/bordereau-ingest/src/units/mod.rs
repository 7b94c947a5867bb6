//! Processing units
//!
//! A unit turns one staged file into loaded rows and reports a result string.
//! Its internals are opaque here: the dispatcher only sees `run(path, tenant)`.

use async_trait::async_trait;
use bordereau_common::types::FileKind;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::PipelineResult;

pub mod procedure;

pub use procedure::PgProcedureUnit;

#[async_trait]
pub trait ProcessingUnit: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn run(&self, path: &str, tenant: &str) -> PipelineResult<String>;
}

/// One registered unit per file kind
#[derive(Clone, Default)]
pub struct UnitRegistry {
    units: HashMap<FileKind, Arc<dyn ProcessingUnit>>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: FileKind, unit: Arc<dyn ProcessingUnit>) -> Self {
        self.units.insert(kind, unit);
        self
    }

    pub fn get(&self, kind: FileKind) -> Option<Arc<dyn ProcessingUnit>> {
        self.units.get(&kind).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl fmt::Debug for UnitRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut units: Vec<(FileKind, &str)> = self
            .units
            .iter()
            .map(|(kind, unit)| (*kind, unit.name()))
            .collect();
        units.sort_by_key(|(kind, _)| kind.as_str());
        f.debug_map().entries(units).finish()
    }
}

/// A unit backed by an async closure
pub struct FnUnit<F> {
    name: String,
    func: F,
}

impl<F, Fut> FnUnit<F>
where
    F: Fn(String, String) -> Fut + Send + Sync,
    Fut: Future<Output = PipelineResult<String>> + Send,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F, Fut> ProcessingUnit for FnUnit<F>
where
    F: Fn(String, String) -> Fut + Send + Sync,
    Fut: Future<Output = PipelineResult<String>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, path: &str, tenant: &str) -> PipelineResult<String> {
        (self.func)(path.to_string(), tenant.to_string()).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    #[tokio::test]
    async fn test_registry_routes_by_kind() {
        let csv = FnUnit::new("csv_loader", |path: String, tenant: String| async move {
            Ok(format!("Loaded {} for {}", path, tenant))
        });
        let excel = FnUnit::new("excel_loader", |_path: String, _tenant: String| async move {
            Err(PipelineError::Data("workbook is encrypted".into()))
        });

        let registry = UnitRegistry::new()
            .register(FileKind::Csv, Arc::new(csv))
            .register(FileKind::Excel, Arc::new(excel));

        let unit = registry.get(FileKind::Csv).unwrap();
        assert_eq!(unit.name(), "csv_loader");
        assert_eq!(
            unit.run("src/acme/a.csv", "acme").await.unwrap(),
            "Loaded src/acme/a.csv for acme"
        );
        assert!(registry.get(FileKind::Excel).unwrap().run("x", "y").await.is_err());
        assert!(registry.get(FileKind::Unknown).is_none());
        assert_eq!(format!("{:?}", registry), r#"{Csv: "csv_loader", Excel: "excel_loader"}"#);
    }
}
