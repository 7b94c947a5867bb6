use regex::Regex;
use std::fmt;

use crate::error::{PipelineError, PipelineResult};

/// A task trigger schedule: `<n> MINUTE[S]` or `USING CRON <5 fields> <timezone>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleExpr {
    Interval { minutes: u32 },
    Cron { fields: Vec<String>, timezone: String },
}

fn invalid(expr: &str, reason: &str) -> PipelineError {
    PipelineError::PolicyViolation(format!("invalid schedule '{}': {}", expr, reason))
}

impl ScheduleExpr {
    pub fn parse(expr: &str) -> PipelineResult<Self> {
        let tokens: Vec<&str> = expr.split_whitespace().collect();

        match tokens.as_slice() {
            [count, unit] if unit.eq_ignore_ascii_case("MINUTE") || unit.eq_ignore_ascii_case("MINUTES") => {
                let minutes: u32 = count
                    .parse()
                    .map_err(|_| invalid(expr, "interval must be a whole number of minutes"))?;
                if minutes == 0 {
                    return Err(invalid(expr, "interval must be at least one minute"));
                }
                Ok(ScheduleExpr::Interval { minutes })
            },
            [using, cron, rest @ ..]
                if using.eq_ignore_ascii_case("USING") && cron.eq_ignore_ascii_case("CRON") =>
            {
                if rest.len() != 6 {
                    return Err(invalid(expr, "cron needs five fields and a timezone"));
                }

                let field = Regex::new(r"^[0-9A-Za-z*,/?#\-]+$")
                    .map_err(|e| PipelineError::Config(e.to_string()))?;
                let zone = Regex::new(r"^[A-Za-z][A-Za-z0-9_+\-]*(/[A-Za-z0-9_+\-]+)*$")
                    .map_err(|e| PipelineError::Config(e.to_string()))?;

                let (fields, timezone) = rest.split_at(5);
                if let Some(bad) = fields.iter().find(|f| !field.is_match(f)) {
                    return Err(invalid(expr, &format!("bad cron field '{}'", bad)));
                }
                let timezone = timezone[0];
                if !zone.is_match(timezone) {
                    return Err(invalid(expr, &format!("bad timezone '{}'", timezone)));
                }

                Ok(ScheduleExpr::Cron {
                    fields: fields.iter().map(|f| f.to_string()).collect(),
                    timezone: timezone.to_string(),
                })
            },
            _ => Err(invalid(expr, "expected '<n> MINUTE' or 'USING CRON <expr> <timezone>'")),
        }
    }
}

impl fmt::Display for ScheduleExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleExpr::Interval { minutes } => write!(f, "{} MINUTE", minutes),
            ScheduleExpr::Cron { fields, timezone } => {
                write!(f, "USING CRON {} {}", fields.join(" "), timezone)
            },
        }
    }
}

impl std::str::FromStr for ScheduleExpr {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
