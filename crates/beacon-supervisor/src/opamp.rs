//! OpAMP wire messages
//!
//! Only the subset of the protocol the supervisor speaks is declared here.
//! Field numbers follow the published `opamp.proto`, so unknown fields
//! sent by a newer server are skipped by the decoder.

use std::collections::HashMap;

use crate::error::{Result, SupervisorError};

/// Agent capability bits
pub mod capabilities {
    pub const REPORTS_STATUS: u64 = 0x0000_0001;
    pub const ACCEPTS_REMOTE_CONFIG: u64 = 0x0000_0002;
    pub const REPORTS_EFFECTIVE_CONFIG: u64 = 0x0000_0004;
    pub const REPORTS_HEALTH: u64 = 0x0000_0800;
    pub const REPORTS_REMOTE_CONFIG: u64 = 0x0000_1000;

    /// Everything this supervisor advertises
    pub const SUPERVISOR: u64 = REPORTS_STATUS
        | ACCEPTS_REMOTE_CONFIG
        | REPORTS_REMOTE_CONFIG
        | REPORTS_EFFECTIVE_CONFIG
        | REPORTS_HEALTH;
}

/// `ServerToAgent.flags`: the server wants the full agent state again
pub const FLAG_REPORT_FULL_STATE: u64 = 0x1;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentToServer {
    #[prost(bytes = "vec", tag = "1")]
    pub instance_uid: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub sequence_num: u64,
    #[prost(message, optional, tag = "3")]
    pub agent_description: Option<AgentDescription>,
    #[prost(uint64, tag = "4")]
    pub capabilities: u64,
    #[prost(message, optional, tag = "5")]
    pub health: Option<ComponentHealth>,
    #[prost(message, optional, tag = "6")]
    pub effective_config: Option<EffectiveConfig>,
    #[prost(message, optional, tag = "7")]
    pub remote_config_status: Option<RemoteConfigStatus>,
    #[prost(uint64, tag = "10")]
    pub flags: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerToAgent {
    #[prost(bytes = "vec", tag = "1")]
    pub instance_uid: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub error_response: Option<ServerErrorResponse>,
    #[prost(message, optional, tag = "3")]
    pub remote_config: Option<AgentRemoteConfig>,
    #[prost(uint64, tag = "6")]
    pub flags: u64,
    #[prost(uint64, tag = "7")]
    pub capabilities: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerErrorResponse {
    #[prost(int32, tag = "1")]
    pub r#type: i32,
    #[prost(string, tag = "2")]
    pub error_message: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentRemoteConfig {
    #[prost(message, optional, tag = "1")]
    pub config: Option<AgentConfigMap>,
    #[prost(bytes = "vec", tag = "2")]
    pub config_hash: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentConfigMap {
    #[prost(map = "string, message", tag = "1")]
    pub config_map: HashMap<String, AgentConfigFile>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentConfigFile {
    #[prost(bytes = "vec", tag = "1")]
    pub body: Vec<u8>,
    #[prost(string, tag = "2")]
    pub content_type: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EffectiveConfig {
    #[prost(message, optional, tag = "1")]
    pub config_map: Option<AgentConfigMap>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum RemoteConfigStatuses {
    Unset = 0,
    Applied = 1,
    Applying = 2,
    Failed = 3,
}

impl RemoteConfigStatuses {
    pub fn as_str(self) -> &'static str {
        match self {
            RemoteConfigStatuses::Unset => "unset",
            RemoteConfigStatuses::Applied => "applied",
            RemoteConfigStatuses::Applying => "applying",
            RemoteConfigStatuses::Failed => "failed",
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoteConfigStatus {
    #[prost(bytes = "vec", tag = "1")]
    pub last_remote_config_hash: Vec<u8>,
    #[prost(enumeration = "RemoteConfigStatuses", tag = "2")]
    pub status: i32,
    #[prost(string, tag = "3")]
    pub error_message: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ComponentHealth {
    #[prost(bool, tag = "1")]
    pub healthy: bool,
    #[prost(fixed64, tag = "2")]
    pub start_time_unix_nano: u64,
    #[prost(string, tag = "3")]
    pub last_error: String,
    #[prost(string, tag = "4")]
    pub status: String,
    #[prost(fixed64, tag = "5")]
    pub status_time_unix_nano: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentDescription {
    #[prost(message, repeated, tag = "1")]
    pub identifying_attributes: Vec<KeyValue>,
    #[prost(message, repeated, tag = "2")]
    pub non_identifying_attributes: Vec<KeyValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyValue {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(message, optional, tag = "2")]
    pub value: Option<AnyValue>,
}

impl KeyValue {
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(AnyValue {
                value: Some(any_value::Value::StringValue(value.into())),
            }),
        }
    }

    pub fn bool(key: impl Into<String>, value: bool) -> Self {
        Self {
            key: key.into(),
            value: Some(AnyValue {
                value: Some(any_value::Value::BoolValue(value)),
            }),
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AnyValue {
    #[prost(oneof = "any_value::Value", tags = "1, 2, 3, 4")]
    pub value: Option<any_value::Value>,
}

pub mod any_value {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(string, tag = "1")]
        StringValue(String),
        #[prost(bool, tag = "2")]
        BoolValue(bool),
        #[prost(int64, tag = "3")]
        IntValue(i64),
        #[prost(double, tag = "4")]
        DoubleValue(f64),
    }
}

/// Encode a message as a WebSocket payload: a zero varint header, then
/// the protobuf bytes.
pub fn encode_frame<M: prost::Message>(msg: &M) -> Vec<u8> {
    let mut buf = Vec::with_capacity(msg.encoded_len() + 1);
    prost::encoding::encode_varint(0, &mut buf);
    // writing into a Vec cannot run out of capacity
    let _ = msg.encode(&mut buf);
    buf
}

pub fn decode_frame<M: prost::Message + Default>(payload: &[u8]) -> Result<M> {
    let mut buf = payload;
    let header = prost::encoding::decode_varint(&mut buf)?;
    if header != 0 {
        return Err(SupervisorError::Protocol(format!(
            "unexpected frame header {}",
            header
        )));
    }
    Ok(M::decode(buf)?)
}
