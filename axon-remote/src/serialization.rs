use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::RwLock;

use axon_actors::DynMessage;
use axon_proto::remote::JsonMessage;
use prost::Message as ProstMessage;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Serializer id for the binary schema encoding.
pub const SERIALIZER_ID_PROTO: i32 = 0;
/// Serializer id for JSON with an explicit wire type name.
pub const SERIALIZER_ID_JSON: i32 = 1;

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("unknown wire type {0}")]
    UnknownType(String),
    #[error("message type is not registered for serialization")]
    UnregisteredMessage,
    #[error("unknown serializer id {0}")]
    UnknownSerializer(i32),
    #[error("encode failure: {0}")]
    Encode(String),
    #[error("decode failure: {0}")]
    Decode(String),
}

type ErasedRef<'a> = &'a (dyn Any + Send + Sync);

struct RegisteredType {
    type_name: String,
    proto_encode: fn(ErasedRef) -> Result<Vec<u8>, SerializationError>,
    proto_decode: fn(&[u8]) -> Result<DynMessage, SerializationError>,
    json_encode: fn(ErasedRef) -> Result<Vec<u8>, SerializationError>,
    json_decode: fn(&[u8]) -> Result<DynMessage, SerializationError>,
}

#[derive(Default)]
struct TypeTable {
    types: Vec<RegisteredType>,
    by_name: HashMap<String, usize>,
    by_type: HashMap<TypeId, usize>,
}

/// Resolves wire type names to decoders and back.
///
/// prost keeps no runtime descriptor set, so registration *is* the schema
/// merge: `register::<T>(name)` installs monomorphized encode/decode entry
/// points for both serializers. Registration is idempotent and append-only;
/// reads after setup are lock-cheap.
#[derive(Default)]
pub struct SerializerRegistry {
    table: RwLock<TypeTable>,
}

impl SerializerRegistry {
    /// Registers `T` under its fully qualified wire name (e.g. `actor.PID`).
    /// Re-registering a known name is a no-op.
    pub fn register<T>(&self, type_name: &str)
    where
        T: ProstMessage + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let mut table = self.table.write().unwrap();
        if table.by_name.contains_key(type_name) {
            return;
        }
        let index = table.types.len();
        table.types.push(RegisteredType {
            type_name: type_name.to_string(),
            proto_encode: proto_encode_erased::<T>,
            proto_decode: proto_decode_erased::<T>,
            json_encode: json_encode_erased::<T>,
            json_decode: json_decode_erased::<T>,
        });
        table.by_name.insert(type_name.to_string(), index);
        table.by_type.insert(TypeId::of::<T>(), index);
    }

    /// The wire type name of `message`: for registered types, the name they
    /// were registered under; for the `JsonMessage` wrapper, the name it
    /// carries.
    pub fn type_name(&self, message: ErasedRef) -> Result<String, SerializationError> {
        if let Some(json_message) = message.downcast_ref::<JsonMessage>() {
            return Ok(json_message.type_name.clone());
        }
        let table = self.table.read().unwrap();
        let index = table
            .by_type
            .get(&message.type_id())
            .ok_or(SerializationError::UnregisteredMessage)?;
        Ok(table.types[*index].type_name.clone())
    }

    pub fn serialize(
        &self,
        message: ErasedRef,
        serializer_id: i32,
    ) -> Result<Vec<u8>, SerializationError> {
        match serializer_id {
            SERIALIZER_ID_PROTO => {
                let table = self.table.read().unwrap();
                let index = table
                    .by_type
                    .get(&message.type_id())
                    .ok_or(SerializationError::UnregisteredMessage)?;
                (table.types[*index].proto_encode)(message)
            }
            SERIALIZER_ID_JSON => {
                if let Some(json_message) = message.downcast_ref::<JsonMessage>() {
                    return Ok(json_message.json.clone().into_bytes());
                }
                let table = self.table.read().unwrap();
                let index = table
                    .by_type
                    .get(&message.type_id())
                    .ok_or(SerializationError::UnregisteredMessage)?;
                (table.types[*index].json_encode)(message)
            }
            other => Err(SerializationError::UnknownSerializer(other)),
        }
    }

    pub fn deserialize(
        &self,
        type_name: &str,
        bytes: &[u8],
        serializer_id: i32,
    ) -> Result<DynMessage, SerializationError> {
        let table = self.table.read().unwrap();
        let index = table
            .by_name
            .get(type_name)
            .ok_or_else(|| SerializationError::UnknownType(type_name.to_string()))?;
        let entry = &table.types[*index];
        match serializer_id {
            SERIALIZER_ID_PROTO => (entry.proto_decode)(bytes),
            SERIALIZER_ID_JSON => (entry.json_decode)(bytes),
            other => Err(SerializationError::UnknownSerializer(other)),
        }
    }

    /// Picks the serializer for an outbound message: the JSON serializer for
    /// `JsonMessage` wrappers, the binary one otherwise.
    pub fn serializer_id_for(&self, message: ErasedRef) -> i32 {
        if message.is::<JsonMessage>() {
            SERIALIZER_ID_JSON
        } else {
            SERIALIZER_ID_PROTO
        }
    }
}

fn proto_encode_erased<T>(message: ErasedRef) -> Result<Vec<u8>, SerializationError>
where
    T: ProstMessage + 'static,
{
    let message = message
        .downcast_ref::<T>()
        .ok_or(SerializationError::UnregisteredMessage)?;
    let mut buf = Vec::with_capacity(message.encoded_len());
    message
        .encode(&mut buf)
        .map_err(|error| SerializationError::Encode(error.to_string()))?;
    Ok(buf)
}

fn proto_decode_erased<T>(bytes: &[u8]) -> Result<DynMessage, SerializationError>
where
    T: ProstMessage + Default + Send + Sync + 'static,
{
    let message = T::decode(bytes).map_err(|error| SerializationError::Decode(error.to_string()))?;
    Ok(Box::new(message))
}

fn json_encode_erased<T>(message: ErasedRef) -> Result<Vec<u8>, SerializationError>
where
    T: Serialize + 'static,
{
    let message = message
        .downcast_ref::<T>()
        .ok_or(SerializationError::UnregisteredMessage)?;
    serde_json::to_vec(message).map_err(|error| SerializationError::Encode(error.to_string()))
}

fn json_decode_erased<T>(bytes: &[u8]) -> Result<DynMessage, SerializationError>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    let message: T =
        serde_json::from_slice(bytes).map_err(|error| SerializationError::Decode(error.to_string()))?;
    Ok(Box::new(message))
}

/// Installs the wire types every node understands.
pub(crate) fn register_wire_types(registry: &SerializerRegistry) {
    registry.register::<axon_proto::actor::Pid>("actor.PID");
    registry.register::<axon_proto::actor::Watch>("actor.Watch");
    registry.register::<axon_proto::actor::Unwatch>("actor.Unwatch");
    registry.register::<axon_proto::actor::Stop>("actor.Stop");
    registry.register::<axon_proto::actor::Terminated>("actor.Terminated");
    registry.register::<axon_proto::remote::ActorPidRequest>("remote.ActorPidRequest");
    registry.register::<axon_proto::remote::ActorPidResponse>("remote.ActorPidResponse");
}
