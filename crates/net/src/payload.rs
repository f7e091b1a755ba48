//! Codecs for the scalar, string, binary and JSON message families.

use crate::data::{DataReceiver, DataSender, PayloadCodec};
use crate::error::MessageError;
use crate::message::DataType;
use crate::schema::{schema_hash, Schema};
use bytemuck::Pod;
use livecapture_core::{WireReader, WireWriter};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// One byte, `0` or `1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolCodec;

impl PayloadCodec for BoolCodec {
    type Value = bool;

    const SENDER_NAME: &'static str = "BoolSender";
    const RECEIVER_NAME: &'static str = "BoolReceiver";

    fn encode(&self, value: &bool, out: &mut Vec<u8>) -> Result<(), MessageError> {
        out.write_bool(*value);
        Ok(())
    }

    fn decode(&self, reader: &mut WireReader<'_>) -> Result<bool, MessageError> {
        Ok(reader.read_bool()?)
    }
}

/// Length-prefixed UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl PayloadCodec for StringCodec {
    type Value = String;

    const SENDER_NAME: &'static str = "StringSender";
    const RECEIVER_NAME: &'static str = "StringReceiver";

    fn encode(&self, value: &String, out: &mut Vec<u8>) -> Result<(), MessageError> {
        out.write_string(value);
        Ok(())
    }

    fn decode(&self, reader: &mut WireReader<'_>) -> Result<String, MessageError> {
        Ok(reader.read_string()?)
    }
}

/// The raw bytes of a fixed-layout struct.
pub struct BinaryCodec<T>(PhantomData<fn() -> T>);

impl<T> Clone for BinaryCodec<T> {
    fn clone(&self) -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for BinaryCodec<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T> std::fmt::Debug for BinaryCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BinaryCodec<{}>", std::any::type_name::<T>())
    }
}

impl<T> PayloadCodec for BinaryCodec<T>
where
    T: Pod + Schema + Send + Sync,
{
    type Value = T;

    const SENDER_NAME: &'static str = "BinarySender";
    const RECEIVER_NAME: &'static str = "BinaryReceiver";

    fn data_type() -> Option<DataType> {
        Some(DataType {
            name: T::schema().name().to_string(),
            hash: schema_hash::<T>(),
        })
    }

    fn encode(&self, value: &T, out: &mut Vec<u8>) -> Result<(), MessageError> {
        out.write_struct(value);
        Ok(())
    }

    fn decode(&self, reader: &mut WireReader<'_>) -> Result<T, MessageError> {
        Ok(reader.read_struct::<T>()?)
    }
}

/// A JSON document in a length-prefixed string.
pub struct JsonCodec<T>(PhantomData<fn() -> T>);

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T> std::fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsonCodec<{}>", std::any::type_name::<T>())
    }
}

impl<T> PayloadCodec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Schema + Send + Sync + 'static,
{
    type Value = T;

    const SENDER_NAME: &'static str = "JsonSender";
    const RECEIVER_NAME: &'static str = "JsonReceiver";

    fn data_type() -> Option<DataType> {
        Some(DataType {
            name: T::schema().name().to_string(),
            hash: schema_hash::<T>(),
        })
    }

    fn encode(&self, value: &T, out: &mut Vec<u8>) -> Result<(), MessageError> {
        out.write_string(&serde_json::to_string(value)?);
        Ok(())
    }

    fn decode(&self, reader: &mut WireReader<'_>) -> Result<T, MessageError> {
        let json = reader.read_string()?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Sends a `bool`.
pub type BoolSender = DataSender<BoolCodec>;
/// Receives a `bool`.
pub type BoolReceiver = DataReceiver<BoolCodec>;
/// Sends a `String`.
pub type StringSender = DataSender<StringCodec>;
/// Receives a `String`.
pub type StringReceiver = DataReceiver<StringCodec>;
/// Sends a fixed-layout struct as raw bytes.
pub type BinarySender<T> = DataSender<BinaryCodec<T>>;
/// Receives a fixed-layout struct as raw bytes.
pub type BinaryReceiver<T> = DataReceiver<BinaryCodec<T>>;
/// Sends a value as JSON.
pub type JsonSender<T> = DataSender<JsonCodec<T>>;
/// Receives a value sent as JSON.
pub type JsonReceiver<T> = DataReceiver<JsonCodec<T>>;
