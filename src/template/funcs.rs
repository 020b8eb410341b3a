//! Functions available inside username templates.

use crate::error::{DbError, DbResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use std::fmt;

/// Longest string `random` will produce.
pub const MAX_RANDOM_LENGTH: i64 = 1024;

/// A value flowing through a template pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Value {
    Int(i64),
    Str(String),
}

impl Value {
    fn into_string(self, func: Func) -> DbResult<String> {
        match self {
            Value::Str(s) => Ok(s),
            Value::Int(i) => Err(DbError::template(format!(
                "{func}: expected string argument, got integer {i}"
            ))),
        }
    }

    fn into_int(self, func: Func) -> DbResult<i64> {
        match self {
            Value::Int(i) => Ok(i),
            Value::Str(s) => Err(DbError::template(format!(
                "{func}: expected integer argument, got {s:?}"
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Func {
    /// `random N`: N cryptographically random characters from `[A-Za-z0-9]`.
    Random,
    /// `truncate N s`: at most the first N characters of s.
    Truncate,
    Uppercase,
    Lowercase,
    /// `replace OLD NEW s`
    Replace,
    UnixTime,
    UnixTimeMillis,
    Uuid,
    Base64,
}

impl Func {
    pub(crate) fn lookup(name: &str) -> Option<Self> {
        let func = match name {
            "random" => Func::Random,
            "truncate" => Func::Truncate,
            "uppercase" => Func::Uppercase,
            "lowercase" => Func::Lowercase,
            "replace" => Func::Replace,
            "unix_time" => Func::UnixTime,
            "unix_time_millis" => Func::UnixTimeMillis,
            "uuid" => Func::Uuid,
            "base64" => Func::Base64,
            _ => return None,
        };
        Some(func)
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Func::Random => "random",
            Func::Truncate => "truncate",
            Func::Uppercase => "uppercase",
            Func::Lowercase => "lowercase",
            Func::Replace => "replace",
            Func::UnixTime => "unix_time",
            Func::UnixTimeMillis => "unix_time_millis",
            Func::Uuid => "uuid",
            Func::Base64 => "base64",
        }
    }

    /// Number of arguments, counting a piped-in value.
    pub(crate) fn arity(self) -> usize {
        match self {
            Func::UnixTime | Func::UnixTimeMillis | Func::Uuid => 0,
            Func::Random | Func::Uppercase | Func::Lowercase | Func::Base64 => 1,
            Func::Truncate => 2,
            Func::Replace => 3,
        }
    }

    /// Apply the function. `args` has already been checked against `arity`.
    pub(crate) fn call(self, args: Vec<Value>) -> DbResult<Value> {
        let mut args = args.into_iter();
        let mut next = || {
            args.next()
                .ok_or_else(|| DbError::template(format!("{self}: missing argument")))
        };

        let result = match self {
            Func::Random => {
                let length = next()?.into_int(self)?;
                if !(1..=MAX_RANDOM_LENGTH).contains(&length) {
                    return Err(DbError::template(format!(
                        "random: length must be between 1 and {MAX_RANDOM_LENGTH}, got {length}"
                    )));
                }
                random_alphanumeric(length as usize)
            }
            Func::Truncate => {
                let max = next()?.into_int(self)?;
                let s = next()?.into_string(self)?;
                if max <= 0 {
                    return Err(DbError::template("truncate: max length must be > 0"));
                }
                s.chars().take(max as usize).collect()
            }
            Func::Uppercase => next()?.into_string(self)?.to_uppercase(),
            Func::Lowercase => next()?.into_string(self)?.to_lowercase(),
            Func::Replace => {
                let from = next()?.into_string(self)?;
                let to = next()?.into_string(self)?;
                let s = next()?.into_string(self)?;
                s.replace(&from, &to)
            }
            Func::UnixTime => Utc::now().timestamp().to_string(),
            Func::UnixTimeMillis => Utc::now().timestamp_millis().to_string(),
            Func::Uuid => uuid::Uuid::new_v4().to_string(),
            Func::Base64 => BASE64.encode(next()?.into_string(self)?),
        };
        Ok(Value::Str(result))
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn random_alphanumeric(length: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Value {
        Value::Str(v.to_string())
    }

    #[test]
    fn test_lookup_round_trip() {
        for name in [
            "random",
            "truncate",
            "uppercase",
            "lowercase",
            "replace",
            "unix_time",
            "unix_time_millis",
            "uuid",
            "base64",
        ] {
            assert_eq!(Func::lookup(name).unwrap().name(), name);
        }
        assert!(Func::lookup("sha256").is_none());
    }

    #[test]
    fn test_random() {
        let Value::Str(a) = Func::Random.call(vec![Value::Int(20)]).unwrap() else {
            panic!("expected string");
        };
        let Value::Str(b) = Func::Random.call(vec![Value::Int(20)]).unwrap() else {
            panic!("expected string");
        };
        assert_eq!(a.len(), 20);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
        assert!(Func::Random.call(vec![Value::Int(0)]).is_err());
        assert!(Func::Random.call(vec![Value::Int(-5)]).is_err());
        assert!(Func::Random.call(vec![s("20")]).is_err());
    }

    #[test]
    fn test_random_length_is_capped() {
        let Value::Str(max) = Func::Random
            .call(vec![Value::Int(MAX_RANDOM_LENGTH)])
            .unwrap()
        else {
            panic!("expected string");
        };
        assert_eq!(max.len(), 1024);

        let err = Func::Random
            .call(vec![Value::Int(MAX_RANDOM_LENGTH + 1)])
            .unwrap_err();
        assert!(err.to_string().contains("between 1 and 1024"), "{err}");
        assert!(Func::Random.call(vec![Value::Int(4_000_000_000)]).is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(
            Func::Truncate.call(vec![Value::Int(3), s("abcdef")]).unwrap(),
            s("abc")
        );
        assert_eq!(
            Func::Truncate.call(vec![Value::Int(64), s("short")]).unwrap(),
            s("short")
        );
        assert_eq!(
            Func::Truncate.call(vec![Value::Int(2), s("ñandú")]).unwrap(),
            s("ña")
        );
        assert!(Func::Truncate.call(vec![Value::Int(0), s("x")]).is_err());
    }

    #[test]
    fn test_case_and_replace() {
        assert_eq!(Func::Uppercase.call(vec![s("token")]).unwrap(), s("TOKEN"));
        assert_eq!(Func::Lowercase.call(vec![s("ToKeN")]).unwrap(), s("token"));
        assert_eq!(
            Func::Replace
                .call(vec![s("-"), s("_"), s("my-role-name")])
                .unwrap(),
            s("my_role_name")
        );
        assert!(Func::Uppercase.call(vec![Value::Int(1)]).is_err());
    }

    #[test]
    fn test_time_and_ids() {
        let Value::Str(secs) = Func::UnixTime.call(vec![]).unwrap() else {
            panic!("expected string");
        };
        assert!(secs.parse::<i64>().unwrap() > 1_600_000_000);

        let Value::Str(id) = Func::Uuid.call(vec![]).unwrap() else {
            panic!("expected string");
        };
        assert!(uuid::Uuid::parse_str(&id).is_ok());

        assert_eq!(Func::Base64.call(vec![s("abc")]).unwrap(), s("YWJj"));
    }
}
