//! Username templates.
//!
//! A template is compiled once, validated by generating a throwaway username
//! from empty metadata, and then expanded for every new user. Literal text and
//! metadata fields expand deterministically; `random` draws fresh entropy on
//! every call, so two generated names never share their random part.

mod funcs;
mod parser;

use crate::error::{DbError, DbResult};
use crate::models::UsernameMetadata;
use funcs::Value;
use parser::{Command, Operand, Segment};

/// Template used when the configuration does not provide one.
pub const DEFAULT_USERNAME_TEMPLATE: &str = "V_{{.DisplayName | uppercase | truncate 64}}_{{.RoleName | uppercase | truncate 64}}_{{random 20 | uppercase}}_{{unix_time}}";

/// A compiled username template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsernameTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl UsernameTemplate {
    /// Parse `source`. Syntax errors and unknown functions are reported here;
    /// unknown fields only surface when generating.
    pub fn compile(source: &str) -> DbResult<Self> {
        let segments = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Compile and immediately test-generate against empty metadata.
    pub fn compile_validated(source: &str) -> DbResult<Self> {
        let template = Self::compile(source)
            .map_err(|e| e.context("unable to initialize username template"))?;
        template
            .generate(&UsernameMetadata::default())
            .map_err(|e| e.context("invalid username template"))?;
        Ok(template)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Expand the template for one user.
    pub fn generate(&self, metadata: &UsernameMetadata) -> DbResult<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Action(commands) => {
                    out.push_str(&eval_pipeline(commands, metadata)?.to_string())
                }
            }
        }
        Ok(out)
    }
}

fn eval_pipeline(commands: &[Command], metadata: &UsernameMetadata) -> DbResult<Value> {
    let mut piped: Option<Value> = None;
    for command in commands {
        let value = match command {
            Command::Operand(operand) => eval_operand(operand, metadata)?,
            Command::Call { func, args } => {
                let mut values = args
                    .iter()
                    .map(|a| eval_operand(a, metadata))
                    .collect::<DbResult<Vec<_>>>()?;
                values.extend(piped.take());
                func.call(values)?
            }
        };
        piped = Some(value);
    }
    piped.ok_or_else(|| DbError::template("empty pipeline"))
}

fn eval_operand(operand: &Operand, metadata: &UsernameMetadata) -> DbResult<Value> {
    match operand {
        Operand::Int(i) => Ok(Value::Int(*i)),
        Operand::Str(s) => Ok(Value::Str(s.clone())),
        Operand::Field(name) => match name.as_str() {
            "DisplayName" => Ok(Value::Str(metadata.display_name.clone())),
            "RoleName" => Ok(Value::Str(metadata.role_name.clone())),
            other => Err(DbError::template(format!(
                "can't evaluate field {other} in username metadata"
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_template() -> UsernameTemplate {
        UsernameTemplate::compile(DEFAULT_USERNAME_TEMPLATE).unwrap()
    }

    #[test]
    fn test_default_template_compiles() {
        let template = default_template();
        assert_eq!(template.source(), DEFAULT_USERNAME_TEMPLATE);
    }

    #[test]
    fn test_default_template_empty_metadata() {
        let name = default_template()
            .generate(&UsernameMetadata::default())
            .unwrap();
        assert!(name.starts_with("V___"), "got {name}");
        let parts: Vec<&str> = name.split('_').collect();
        // V, "", "", RANDOM, UNIX
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[3].len(), 20);
        assert!(parts[3].chars().all(|c| !c.is_ascii_lowercase()));
        assert!(parts[4].parse::<i64>().is_ok());
    }

    #[test]
    fn test_default_template_with_metadata() {
        let name = default_template()
            .generate(&UsernameMetadata::new("token", "readonly"))
            .unwrap();
        assert!(name.starts_with("V_TOKEN_READONLY_"), "got {name}");
    }

    #[test]
    fn test_truncates_long_metadata() {
        let long = "x".repeat(200);
        let name = default_template()
            .generate(&UsernameMetadata::new(long.clone(), long))
            .unwrap();
        let parts: Vec<&str> = name.split('_').collect();
        assert_eq!(parts[1].len(), 64);
        assert_eq!(parts[2].len(), 64);
    }

    #[test]
    fn test_string_literal_operand() {
        let template = UsernameTemplate::compile(r#"{{"svc" | uppercase}}-{{.RoleName}}"#).unwrap();
        let name = template
            .generate(&UsernameMetadata::new("", "app"))
            .unwrap();
        assert_eq!(name, "SVC-app");
    }

    #[test]
    fn test_unknown_field_fails_validation() {
        let template = UsernameTemplate::compile("{{.Missing}}").unwrap();
        assert!(template.generate(&UsernameMetadata::default()).is_err());

        let err = UsernameTemplate::compile_validated("{{.Missing}}").unwrap_err();
        assert!(err.to_string().contains("invalid username template"));
    }

    #[test]
    fn test_syntax_error_fails_compile() {
        let err = UsernameTemplate::compile_validated("{{.DisplayName").unwrap_err();
        assert!(matches!(err, DbError::Template { .. }));
        assert!(err.to_string().contains("unable to initialize username template"));
    }

    #[test]
    fn test_type_error_fails_validation() {
        let err = UsernameTemplate::compile_validated("{{.RoleName | random}}").unwrap_err();
        assert!(matches!(err, DbError::Template { .. }));
    }
}
