/*!
# Keyword Configuration

Callers describe a run with loosely typed keyword arguments ([`Kwargs`]). Each
engine declares a [`Schema`]: a fixed list of typed [`Field`]s with defaults and
a static [`Alias`] table. [`Configuration::translate`] resolves aliases once,
merges defaults with overrides, type-checks every value and splits the result
into engine options and run bookkeeping ([`RunSettings`]).

```rust
use mcmc_harness::config::Configuration;
use mcmc_harness::ensemble::ENSEMBLE_SCHEMA;
use mcmc_harness::kwargs;

let config = Configuration::translate(
    &ENSEMBLE_SCHEMA,
    kwargs! { "nsteps" => 200, "nwalkers" => 20 },
).unwrap();
assert_eq!(config.count("iterations").unwrap(), 200);
assert!(config.get("nsteps").is_none());
```
*/

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Prefix under which run bookkeeping keys appear in [`Configuration::to_map`].
pub const RUN_PREFIX: &str = "run.";

/// Keyword arguments as supplied by the caller, in insertion order.
pub type Kwargs = IndexMap<String, Value>;

/// Builds a [`Kwargs`] map from `key => value` pairs.
///
/// ```rust
/// use mcmc_harness::kwargs;
/// let kw = kwargs! { "nwalkers" => 100, "resume" => false, "label" => "run1" };
/// assert_eq!(kw.len(), 3);
/// ```
#[macro_export]
macro_rules! kwargs {
    () => { $crate::config::Kwargs::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut kwargs = $crate::config::Kwargs::new();
        $(
            kwargs.insert(
                ::std::string::String::from($key),
                $crate::config::Value::from($value),
            );
        )+
        kwargs
    }};
}

/// A single option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent / "use the automatic behaviour".
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Integer above `i64::MAX`, such as a large seed.
    UInt(u64),
    /// Floating point number.
    Float(f64),
    /// Text.
    Str(Cow<'static, str>),
}

impl Value {
    /// Returns the value as a non-negative integer, if it is one.
    pub fn as_count(&self) -> Option<usize> {
        match *self {
            Value::Int(i) if i >= 0 => usize::try_from(i).ok(),
            Value::UInt(n) => usize::try_from(n).ok(),
            _ => None,
        }
    }

    /// Returns the value as a non-negative 64-bit integer, if it is one.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::Int(i) => u64::try_from(i).ok(),
            Value::UInt(n) => Some(n),
            _ => None,
        }
    }

    /// Returns the value as a float; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(x) => Some(x),
            Value::Int(i) => Some(i as f64),
            Value::UInt(n) => Some(n as f64),
            _ => None,
        }
    }

    /// Returns the boolean payload.
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the text payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::UInt(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        i64::try_from(n).map_or(Value::UInt(n as u64), Value::Int)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        i64::try_from(n).map_or(Value::UInt(n), Value::Int)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Cow::Owned(s.to_owned()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Cow::Owned(s))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// `true` / `false`.
    Bool,
    /// Non-negative integer.
    Count,
    /// Non-negative integer or null.
    OptionalCount,
    /// Any `u64` or null.
    OptionalU64,
    /// Any number; integers are widened.
    Float,
    /// Text.
    Text,
}

impl Kind {
    fn describe(self) -> &'static str {
        match self {
            Kind::Bool => "a boolean",
            Kind::Count => "a non-negative integer",
            Kind::OptionalCount => "a non-negative integer or null",
            Kind::OptionalU64 => "an unsigned 64-bit integer or null",
            Kind::Float => "a number",
            Kind::Text => "a string",
        }
    }

    /// Checks `value` against this kind and returns its canonical form.
    fn coerce(self, key: &'static str, value: Value) -> Result<Value, ConfigError> {
        if self == Kind::Float {
            if let Some(x) = value.as_f64() {
                return Ok(Value::Float(x));
            }
        }
        let ok = match (self, &value) {
            (Kind::Bool, Value::Bool(_)) => true,
            (Kind::Count | Kind::OptionalCount, v) => v.as_count().is_some(),
            (Kind::OptionalU64, v) => v.as_u64().is_some(),
            _ => false,
        } || matches!(
            (self, &value),
            (Kind::OptionalCount | Kind::OptionalU64, Value::Null)
                | (Kind::Text, Value::Str(_))
        );
        if ok {
            Ok(value)
        } else {
            Err(ConfigError::InvalidValue {
                key,
                expected: self.describe(),
                found: value.to_string(),
            })
        }
    }
}

/// A named, typed option with its default.
#[derive(Debug, Clone)]
pub struct Field {
    /// Canonical option name.
    pub name: &'static str,
    /// Declared type.
    pub kind: Kind,
    /// Value used when the caller does not override it.
    pub default: Value,
}

impl Field {
    /// Convenience constructor for static tables.
    pub const fn new(name: &'static str, kind: Kind, default: Value) -> Self {
        Self {
            name,
            kind,
            default,
        }
    }
}

/// Alternative spellings accepted for a canonical option.
#[derive(Debug, Clone, Copy)]
pub struct Alias {
    /// Canonical option name.
    pub canonical: &'static str,
    /// Accepted alternatives.
    pub accepted: &'static [&'static str],
}

/// Declared option set of an engine (or of the run itself).
#[derive(Debug)]
pub struct Schema {
    /// Name used in diagnostics.
    pub name: &'static str,
    /// Every option the schema understands.
    pub fields: &'static [Field],
    /// Alias table, resolved once at translation time.
    pub aliases: &'static [Alias],
}

impl Schema {
    /// Looks up a field by canonical name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Maps a supplied key to the canonical field name, if the schema knows it.
    pub fn canonical(&self, key: &str) -> Option<&'static str> {
        if let Some(field) = self.field(key) {
            return Some(field.name);
        }
        self.aliases
            .iter()
            .find(|alias| alias.accepted.contains(&key))
            .map(|alias| alias.canonical)
    }
}

const fn text(s: &'static str) -> Value {
    Value::Str(Cow::Borrowed(s))
}

/// Options shared by every engine: output location, resume and burn-in policy.
pub static RUN_SCHEMA: Schema = Schema {
    name: "run",
    fields: &[
        Field::new("outdir", Kind::Text, text("outdir")),
        Field::new("label", Kind::Text, text("label")),
        Field::new("resume", Kind::Bool, Value::Bool(true)),
        Field::new("nburn", Kind::OptionalCount, Value::Null),
        Field::new("burn_in_fraction", Kind::Float, Value::Float(0.25)),
        Field::new("burn_in_act", Kind::Float, Value::Float(3.0)),
        Field::new("autocorr_c", Kind::Float, Value::Float(3.0)),
        Field::new("autocorr_tol", Kind::Float, Value::Float(50.0)),
        Field::new("autoburnin", Kind::Bool, Value::Bool(false)),
        Field::new("checkpoint_interval", Kind::Count, Value::Int(100)),
        Field::new("npool", Kind::Count, Value::Int(1)),
        Field::new("seed", Kind::OptionalU64, Value::Null),
        Field::new("progress", Kind::Bool, Value::Bool(true)),
    ],
    aliases: &[
        Alias {
            canonical: "autoburnin",
            accepted: &["auto_burnin"],
        },
        Alias {
            canonical: "npool",
            accepted: &["threads", "nthreads"],
        },
    ],
};

/// Typed view of the run bookkeeping options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Directory holding the checkpoint and result files.
    pub outdir: PathBuf,
    /// Run label; keys the checkpoint file inside `outdir`.
    pub label: String,
    /// Continue from an existing checkpoint when one is present.
    pub resume: bool,
    /// Fixed burn-in length; `None` estimates it from the chain.
    pub nburn: Option<usize>,
    /// Fraction of the chain discarded when the autocorrelation estimate fails.
    pub burn_in_fraction: f64,
    /// Number of autocorrelation times discarded as burn-in.
    pub burn_in_act: f64,
    /// Window constant of the automatic windowing procedure.
    pub autocorr_c: f64,
    /// The chain must be longer than `autocorr_tol` autocorrelation times.
    pub autocorr_tol: f64,
    /// Let the engine run its own burn-in pre-pass.
    pub autoburnin: bool,
    /// Iterations per batch between checkpoint writes.
    pub checkpoint_interval: usize,
    /// Worker threads used to evaluate the posterior.
    pub npool: usize,
    /// Seed for the engine's random stream.
    pub seed: Option<u64>,
    /// Show a progress bar while sampling.
    pub progress: bool,
}

impl RunSettings {
    fn from_values(values: &BTreeMap<String, Value>) -> Result<Self, ConfigError> {
        let string = |key: &'static str| -> Result<String, ConfigError> {
            lookup(values, key)?
                .as_str()
                .map(str::to_owned)
                .ok_or_else(|| mistyped(values, key, Kind::Text))
        };
        let flag = |key: &'static str| -> Result<bool, ConfigError> {
            lookup(values, key)?
                .as_bool()
                .ok_or_else(|| mistyped(values, key, Kind::Bool))
        };
        let number = |key: &'static str| -> Result<f64, ConfigError> {
            lookup(values, key)?
                .as_f64()
                .ok_or_else(|| mistyped(values, key, Kind::Float))
        };
        let count = |key: &'static str| -> Result<usize, ConfigError> {
            lookup(values, key)?
                .as_count()
                .ok_or_else(|| mistyped(values, key, Kind::Count))
        };
        let optional = |key: &'static str| -> Result<Option<usize>, ConfigError> {
            let value = lookup(values, key)?;
            if value.is_null() {
                Ok(None)
            } else {
                value
                    .as_count()
                    .map(Some)
                    .ok_or_else(|| mistyped(values, key, Kind::OptionalCount))
            }
        };
        let seed = || -> Result<Option<u64>, ConfigError> {
            let value = lookup(values, "seed")?;
            if value.is_null() {
                Ok(None)
            } else {
                value
                    .as_u64()
                    .map(Some)
                    .ok_or_else(|| mistyped(values, "seed", Kind::OptionalU64))
            }
        };

        let settings = Self {
            outdir: PathBuf::from(string("outdir")?),
            label: string("label")?,
            resume: flag("resume")?,
            nburn: optional("nburn")?,
            burn_in_fraction: number("burn_in_fraction")?,
            burn_in_act: number("burn_in_act")?,
            autocorr_c: number("autocorr_c")?,
            autocorr_tol: number("autocorr_tol")?,
            autoburnin: flag("autoburnin")?,
            checkpoint_interval: count("checkpoint_interval")?,
            npool: count("npool")?,
            seed: seed()?,
            progress: flag("progress")?,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.label.is_empty() {
            return Err(ConfigError::Constraint("label must not be empty".into()));
        }
        if !(0.0..1.0).contains(&self.burn_in_fraction) {
            return Err(ConfigError::Constraint(format!(
                "burn_in_fraction must lie in [0, 1), got {}",
                self.burn_in_fraction
            )));
        }
        for (key, value) in [
            ("burn_in_act", self.burn_in_act),
            ("autocorr_c", self.autocorr_c),
            ("autocorr_tol", self.autocorr_tol),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Constraint(format!(
                    "{key} must be a positive number, got {value}"
                )));
            }
        }
        if self.checkpoint_interval == 0 {
            return Err(ConfigError::Constraint(
                "checkpoint_interval must be at least 1".into(),
            ));
        }
        if self.npool == 0 {
            return Err(ConfigError::Constraint("npool must be at least 1".into()));
        }
        Ok(())
    }
}

fn lookup<'a>(
    values: &'a BTreeMap<String, Value>,
    key: &'static str,
) -> Result<&'a Value, ConfigError> {
    values.get(key).ok_or(ConfigError::UnknownKey {
        key: key.to_owned(),
        engine: "run",
    })
}

fn mistyped(values: &BTreeMap<String, Value>, key: &'static str, kind: Kind) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        expected: kind.describe(),
        found: values.get(key).map(Value::to_string).unwrap_or_default(),
    }
}

/// Translated, type-checked configuration of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    engine_name: &'static str,
    engine: BTreeMap<String, Value>,
    run: BTreeMap<String, Value>,
    settings: RunSettings,
}

impl Configuration {
    /// Resolves aliases, merges `kwargs` over the defaults of `schema` and
    /// [`RUN_SCHEMA`], and type-checks the result.
    ///
    /// Fails on keys neither schema knows, on several keys naming the same
    /// option and on ill-typed values.
    pub fn translate(schema: &'static Schema, kwargs: Kwargs) -> Result<Self, ConfigError> {
        let mut engine_supplied: BTreeMap<&'static str, Vec<(String, Value)>> = BTreeMap::new();
        let mut run_supplied: BTreeMap<&'static str, Vec<(String, Value)>> = BTreeMap::new();

        for (key, value) in kwargs {
            if let Some(canonical) = schema.canonical(&key) {
                engine_supplied
                    .entry(canonical)
                    .or_default()
                    .push((key, value));
            } else if let Some(canonical) = RUN_SCHEMA.canonical(&key) {
                run_supplied.entry(canonical).or_default().push((key, value));
            } else {
                return Err(ConfigError::UnknownKey {
                    key,
                    engine: schema.name,
                });
            }
        }

        let engine = merge(schema, engine_supplied)?;
        let run = merge(&RUN_SCHEMA, run_supplied)?;
        let settings = RunSettings::from_values(&run)?;

        Ok(Self {
            engine_name: schema.name,
            engine,
            run,
            settings,
        })
    }

    /// Name of the engine schema this configuration was translated against.
    pub fn engine_name(&self) -> &'static str {
        self.engine_name
    }

    /// Typed run bookkeeping.
    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Engine option by canonical name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.engine.get(key)
    }

    /// Engine option as a non-negative integer.
    pub fn count(&self, key: &'static str) -> Result<usize, ConfigError> {
        self.typed(key, Kind::Count, Value::as_count)
    }

    /// Engine option as an optional non-negative integer.
    pub fn optional_count(&self, key: &'static str) -> Result<Option<usize>, ConfigError> {
        match self.get(key) {
            Some(Value::Null) => Ok(None),
            _ => self
                .typed(key, Kind::OptionalCount, Value::as_count)
                .map(Some),
        }
    }

    /// Engine option as a float.
    pub fn float(&self, key: &'static str) -> Result<f64, ConfigError> {
        self.typed(key, Kind::Float, Value::as_f64)
    }

    /// Engine option as a boolean.
    pub fn flag(&self, key: &'static str) -> Result<bool, ConfigError> {
        self.typed(key, Kind::Bool, Value::as_bool)
    }

    fn typed<T>(
        &self,
        key: &'static str,
        kind: Kind,
        extract: impl Fn(&Value) -> Option<T>,
    ) -> Result<T, ConfigError> {
        let value = self.get(key).ok_or(ConfigError::UnknownKey {
            key: key.to_owned(),
            engine: self.engine_name,
        })?;
        extract(value).ok_or_else(|| ConfigError::InvalidValue {
            key,
            expected: kind.describe(),
            found: value.to_string(),
        })
    }

    /// Overwrites an engine option that the schema already declared.
    pub(crate) fn replace(&mut self, key: &str, value: Value) {
        if let Some(slot) = self.engine.get_mut(key) {
            *slot = value;
        }
    }

    /// Number of walkers in the ensemble.
    pub fn nwalkers(&self) -> Result<usize, ConfigError> {
        self.count("nwalkers")
    }

    /// Requested number of (post burn-in) iterations.
    pub fn iterations(&self) -> Result<usize, ConfigError> {
        self.count("iterations")
    }

    /// Engine keys followed by `run.`-prefixed bookkeeping keys.
    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.engine
            .keys()
            .cloned()
            .chain(self.run.keys().map(|k| format!("{RUN_PREFIX}{k}")))
    }

    /// Flattened view used in result metadata.
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        let mut map = self.engine.clone();
        map.extend(
            self.run
                .iter()
                .map(|(k, v)| (format!("{RUN_PREFIX}{k}"), v.clone())),
        );
        map
    }
}

fn merge(
    schema: &'static Schema,
    mut supplied: BTreeMap<&'static str, Vec<(String, Value)>>,
) -> Result<BTreeMap<String, Value>, ConfigError> {
    let mut out = BTreeMap::new();
    for field in schema.fields {
        let value = match supplied.remove(field.name) {
            None => field.default.clone(),
            Some(mut given) if given.len() == 1 => given.remove(0).1,
            Some(given) => {
                let mut keys: Vec<String> = given.into_iter().map(|(k, _)| k).collect();
                keys.sort();
                return Err(ConfigError::Conflict {
                    canonical: field.name,
                    supplied: keys,
                });
            }
        };
        out.insert(field.name.to_owned(), field.kind.coerce(field.name, value)?);
    }
    Ok(out)
}
