use async_trait::async_trait;
use regex::Regex;
use sqlx::PgPool;
use tracing::{debug, instrument};

use super::ProcessingUnit;
use crate::error::{PipelineError, PipelineResult};

/// Plain, optionally schema-qualified SQL identifier.
fn is_function_name(name: &str) -> PipelineResult<bool> {
    let pattern = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .map_err(|e| PipelineError::Config(e.to_string()))?;
    Ok(pattern.is_match(name))
}

/// Runs a database function `fn(path text, tenant text) -> text`.
#[derive(Clone)]
pub struct PgProcedureUnit {
    pool: PgPool,
    function: String,
}

impl PgProcedureUnit {
    /// The function name is interpolated into SQL, so only plain
    /// (optionally schema-qualified) identifiers are accepted.
    pub fn new(pool: PgPool, function: impl Into<String>) -> PipelineResult<Self> {
        let function = function.into();
        if !is_function_name(&function)? {
            return Err(PipelineError::Config(format!(
                "'{}' is not a valid function name",
                function
            )));
        }
        Ok(Self { pool, function })
    }
}

#[async_trait]
impl ProcessingUnit for PgProcedureUnit {
    fn name(&self) -> &str {
        &self.function
    }

    #[instrument(skip(self), fields(function = %self.function))]
    async fn run(&self, path: &str, tenant: &str) -> PipelineResult<String> {
        let sql = format!("SELECT {}($1, $2)::text", self.function);
        let (result,): (Option<String>,) = sqlx::query_as(&sql)
            .bind(path)
            .bind(tenant)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) => PipelineError::Data(db.message().to_string()),
                other => PipelineError::Database(other),
            })?;

        debug!(path = %path, "Processing unit returned");

        Ok(result.unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_function_name_validation() {
        assert!(is_function_name("process_single_csv_file").unwrap());
        assert!(is_function_name("bronze.process_single_excel_file").unwrap());
        assert!(!is_function_name("drop table x; --").unwrap());
        assert!(!is_function_name("1st_unit").unwrap());
        assert!(!is_function_name("a.b.c").unwrap());
    }

    #[tokio::test]
    async fn test_rejects_injected_name() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgresql://localhost/bordereau")
            .unwrap();
        assert!(matches!(
            PgProcedureUnit::new(pool.clone(), "x(); DROP TABLE file_processing_queue"),
            Err(PipelineError::Config(_))
        ));
        assert!(PgProcedureUnit::new(pool, "process_single_csv_file").is_ok());
    }
}
