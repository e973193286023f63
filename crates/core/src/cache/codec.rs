//! Payload codecs.
//!
//! The store persists opaque bytes. A [`Codec`] turns those bytes into the
//! shape a caller asked for; any failure to do so is reported as
//! [`Error::Corrupt`], whether the file was truncated or the wrong codec
//! was used.

use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};

use crate::Error;

/// Converts values to and from stored payload bytes.
pub trait Codec {
    type Value;

    fn encode(&self, value: &Self::Value) -> Result<Vec<u8>, Error>;

    fn decode(&self, bytes: Vec<u8>) -> Result<Self::Value, Error>;
}

/// Identity codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct Raw;

impl Codec for Raw {
    type Value = Vec<u8>;

    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>, Error> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: Vec<u8>) -> Result<Vec<u8>, Error> {
        Ok(bytes)
    }
}

/// UTF-8 text payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Text;

impl Codec for Text {
    type Value = String;

    fn encode(&self, value: &String) -> Result<Vec<u8>, Error> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, bytes: Vec<u8>) -> Result<String, Error> {
        String::from_utf8(bytes).map_err(|e| Error::Corrupt(format!("payload is not valid UTF-8: {e}")))
    }
}

/// serde_json encoding of any serializable value.
#[derive(Debug)]
pub struct Json<T>(PhantomData<fn() -> T>);

impl<T> Json<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Json<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Json<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Copy for Json<T> {}

impl<T: Serialize + DeserializeOwned> Codec for Json<T> {
    type Value = T;

    fn encode(&self, value: &T) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: Vec<u8>) -> Result<T, Error> {
        serde_json::from_slice(&bytes).map_err(|e| Error::Corrupt(format!("payload failed to decode: {e}")))
    }
}
