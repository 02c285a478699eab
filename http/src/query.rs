//! Query strings, and combinators that turn a raw query value into a typed one.
//!
//! A combinator is any `Fn(Option<&str>) -> Result<T, CouldNotParse>`. The
//! input is `None` when the key is missing from the query string or was given
//! without a `=value`.
//!
//! ```ignore
//! let schema = Schema::new()
//!     .param("limit", with_default_as(as_type::<u32>(), 10))
//!     .param("order", as_choice(&["asc", "desc"]))
//!     .param("cursor", maybe_as(as_nonempty(as_type::<String>())));
//! ```

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt::{Display, Formatter};
use core::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CouldNotParse;

impl Display for CouldNotParse {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str("could not parse query parameter")
    }
}

/// The query part of a request target. Values are not percent-decoded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    params: BTreeMap<String, Option<String>>,
}

impl Query {
    /// Parses `a=1&b&c=3`. A token without `=` maps to no value, a token with
    /// more than one `=` is dropped, and a repeated key keeps its last value.
    pub fn parse(query: &str) -> Self {
        let mut params = BTreeMap::new();

        for token in query.split('&').filter(|t| !t.is_empty()) {
            let mut kv = token.split('=');
            match (kv.next(), kv.next(), kv.next()) {
                (Some(k), Some(v), None) => {
                    params.insert(k.to_string(), Some(v.to_string()));
                }
                (Some(k), None, _) => {
                    params.insert(k.to_string(), None);
                }
                _ => debug!("unparsable query param: {}", token),
            }
        }

        Self { params }
    }

    /// The raw value for `key`, `None` if absent or given without a value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_deref())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Types a raw query value can be converted into with [`as_type`].
pub trait FromQuery: Sized {
    fn from_query(value: &str) -> Result<Self, CouldNotParse>;
}

macro_rules! from_query_via_from_str {
    ($($t:ty),*) => {
        $(
            impl FromQuery for $t {
                fn from_query(value: &str) -> Result<Self, CouldNotParse> {
                    <$t as FromStr>::from_str(value).or(Err(CouldNotParse))
                }
            }
        )*
    };
}

from_query_via_from_str!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, bool);

impl FromQuery for String {
    fn from_query(value: &str) -> Result<Self, CouldNotParse> {
        Ok(value.to_string())
    }
}

/// Converts the value to `T`. An absent value always fails.
pub fn as_type<T: FromQuery>() -> impl Fn(Option<&str>) -> Result<T, CouldNotParse> {
    |value: Option<&str>| match value {
        Some(v) => T::from_query(v),
        None => Err(CouldNotParse),
    }
}

/// Passes the value through if it is one of `choices`.
pub fn as_choice(
    choices: &'static [&'static str],
) -> impl Fn(Option<&str>) -> Result<String, CouldNotParse> {
    move |value: Option<&str>| match value {
        Some(v) if choices.contains(&v) => Ok(v.to_string()),
        _ => Err(CouldNotParse),
    }
}

/// Things with a length, for [`as_nonempty`].
pub trait Length {
    fn length(&self) -> usize;
}

impl Length for String {
    fn length(&self) -> usize {
        self.len()
    }
}

impl<T> Length for Vec<T> {
    fn length(&self) -> usize {
        self.len()
    }
}

/// Applies `parser` and fails if the result is empty.
pub fn as_nonempty<T, P>(parser: P) -> impl Fn(Option<&str>) -> Result<T, CouldNotParse>
where
    T: Length,
    P: Fn(Option<&str>) -> Result<T, CouldNotParse>,
{
    move |value: Option<&str>| {
        let parsed = parser(value)?;
        if parsed.length() == 0 {
            return Err(CouldNotParse);
        }
        Ok(parsed)
    }
}

/// Applies `parser`, substituting `default` for any failure.
pub fn with_default_as<T, P>(parser: P, default: T) -> impl Fn(Option<&str>) -> Result<T, CouldNotParse>
where
    T: Clone,
    P: Fn(Option<&str>) -> Result<T, CouldNotParse>,
{
    move |value: Option<&str>| Ok(parser(value).unwrap_or_else(|_| default.clone()))
}

/// Makes absence valid. `parser` is still tried first, and only its failure
/// on an absent value becomes `None`; a present value must parse.
pub fn maybe_as<T, P>(parser: P) -> impl Fn(Option<&str>) -> Result<Option<T>, CouldNotParse>
where
    P: Fn(Option<&str>) -> Result<T, CouldNotParse>,
{
    move |value: Option<&str>| match parser(value) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) if value.is_none() => Ok(None),
        Err(e) => Err(e),
    }
}

/// A parsed query parameter with its type erased, so one schema can hold
/// combinators of different output types.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Int(v as i64)
                }
            }
        )*
    };
}

value_from_int!(i8, i16, i32, i64, isize, u8, u16, u32, usize);

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Float(v as f64),
        }
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::None,
        }
    }
}

/// The validated output of a [`Schema`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params {
    values: BTreeMap<String, Value>,
}

impl Params {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(Value::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(Value::Float(f)) => Some(*f),
            Some(Value::Int(i)) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(Value::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

type ErasedParser = Box<dyn Fn(Option<&str>) -> Result<Value, CouldNotParse>>;

/// Query parameters a route requires, each with the combinator that validates it.
#[derive(Default)]
pub struct Schema {
    params: Vec<(String, ErasedParser)>,
}

/// A parameter that failed validation, with the raw value it was given.
pub type Invalid = (String, Option<String>);

impl Schema {
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    pub fn param<T, P>(mut self, name: &str, parser: P) -> Self
    where
        T: Into<Value>,
        P: Fn(Option<&str>) -> Result<T, CouldNotParse> + 'static,
    {
        self.params.push((
            name.to_string(),
            Box::new(move |value: Option<&str>| parser(value).map(Into::into)),
        ));
        self
    }

    /// Runs every combinator. Failures are collected rather than stopping at
    /// the first, so a client can be told about every bad parameter at once.
    pub fn apply(&self, query: &Query) -> Result<Params, Vec<Invalid>> {
        let mut values = BTreeMap::new();
        let mut invalid = Vec::new();

        for (name, parser) in &self.params {
            let raw = query.get(name);
            match parser(raw) {
                Ok(v) => {
                    values.insert(name.clone(), v);
                }
                Err(_) => invalid.push((name.clone(), raw.map(|r| r.to_string()))),
            }
        }

        if !invalid.is_empty() {
            return Err(invalid);
        }

        Ok(Params { values })
    }
}
