//! Item processors for each pipeline stage.
//!
//! The engine passes processor settings through untouched, so each processor
//! reads its own knobs from a shared [`ProcessOptions`] map.

use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use crate::{async_utils::io::read_json_or_toml, prelude::*};

pub mod ocr;
pub mod rasterize;

/// Named processor options, such as `dpi = 200` or `lang = "spa+eng"`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ProcessOptions(BTreeMap<String, Value>);

impl ProcessOptions {
    /// Load options from a TOML or JSON file, then apply `KEY=VALUE`
    /// overrides.
    pub async fn load(path: Option<&Path>, overrides: &[String]) -> Result<Self> {
        let mut opts = match path {
            Some(path) => read_json_or_toml::<Self>(path).await?,
            None => Self::default(),
        };
        for assignment in overrides {
            let (key, value) = assignment
                .split_once('=')
                .ok_or_else(|| anyhow!("expected KEY=VALUE, got {:?}", assignment))?;
            opts.set(key.trim(), value.trim());
        }
        Ok(opts)
    }

    /// Set an option.
    pub fn set(&mut self, key: &str, value: &str) {
        self.0
            .insert(key.to_owned(), Value::String(value.to_owned()));
    }

    /// Get an option as a string. Numbers and booleans are converted.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Get and parse an option, falling back to `default` if unset.
    pub fn get_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get_str(key) {
            Some(raw) => raw
                .parse::<T>()
                .map_err(|err| anyhow!("invalid value {:?} for option {}: {}", raw, key, err)),
            None => Ok(default),
        }
    }

    /// Options whose keys start with `prefix`, with the prefix removed.
    pub fn with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, String)> + 'a {
        self.0.keys().filter_map(move |key| {
            let name = key.strip_prefix(prefix)?;
            Some((name, self.get_str(key)?))
        })
    }
}
