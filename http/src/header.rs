use alloc::string::{String, ToString};
use alloc::vec::Vec;
use embedded_io_async::Write;

use crate::ascii::{CR, LF};
use crate::{HTTPError, HttpWrite};

pub const ACCESS_CONTROL_ALLOW_ORIGIN: &str = "access-control-allow-origin";
pub const CACHE_CONTROL: &str = "cache-control";
pub const CONNECTION: &str = "connection";
pub const CONTENT_LENGTH: &str = "content-length";
pub const CONTENT_TYPE: &str = "content-type";
pub const LOCATION: &str = "location";
pub const SEC_WEBSOCKET_ACCEPT: &str = "sec-websocket-accept";
pub const SEC_WEBSOCKET_KEY: &str = "sec-websocket-key";
pub const UPGRADE: &str = "upgrade";

/// An ordered list of header fields.
///
/// Names are stored lower-cased, so every lookup is case-insensitive. `set`
/// replaces all earlier fields of the same name; `append` keeps them, and
/// `get` then returns the last one.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replaces any existing fields called `name`. A replaced field keeps the
    /// position of the first field it replaces.
    pub fn set(&mut self, name: &str, value: &str) {
        match self.position(name) {
            Some(first) => {
                self.fields[first].1 = value.to_string();
                let mut i = first + 1;
                while i < self.fields.len() {
                    if self.fields[i].0.eq_ignore_ascii_case(name) {
                        self.fields.remove(i);
                    } else {
                        i += 1;
                    }
                }
            }
            None => self.append(name, value),
        }
    }

    pub fn append(&mut self, name: &str, value: &str) {
        self.fields
            .push((name.trim().to_ascii_lowercase(), value.to_string()));
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.fields.len();
        self.fields.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before != self.fields.len()
    }

    /// `set`s every field of `other`, in order.
    pub fn merge(&mut self, other: &Headers) {
        for (k, v) in other.iter() {
            self.set(k, v);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Headers {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.set(k, v);
        }
        headers
    }
}

/// A single `name: value` line on the wire.
pub(crate) struct HeaderLine<'a>(pub &'a str, pub &'a str);

impl<'a> HttpWrite for HeaderLine<'a> {
    async fn write<T: Write>(self, writer: &mut T) -> Result<(), HTTPError> {
        writer
            .write_all(self.0.as_bytes())
            .await
            .or(Err(HTTPError::Disconnected))?;
        writer
            .write_all(": ".as_bytes())
            .await
            .or(Err(HTTPError::Disconnected))?;
        writer
            .write_all(self.1.as_bytes())
            .await
            .or(Err(HTTPError::Disconnected))?;
        writer
            .write_all(&[CR, LF])
            .await
            .or(Err(HTTPError::Disconnected))
    }
}
