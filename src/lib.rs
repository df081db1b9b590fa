pub mod protocol;
pub mod codec;
pub mod schema;
pub mod observer;
pub mod definition;
pub mod registry;
pub mod cipher;
pub mod compression;
pub mod container;
pub mod config;
pub mod error;
pub mod debug;

pub use protocol::{
    ArgValue, CallRecord, EntityName, MemberCategory, MemberName, TypeTag, WireIndex,
};

pub use codec::{
    ArgumentDecoder, ArrayDecoder, CodecTable, FixedDecoder, StringDecoder, StringRule,
};

pub use schema::{
    EntitySchema, MethodSchema, PropertySchema, ProtocolSchema, ProtocolVersion,
};

pub use observer::{
    Delivery, MemberEvent, ObserverRegistry, SubscriptionHandle,
};

pub use definition::{
    EntityDefinition, EntityState, FireReport, MemberDescriptor, MethodDescriptor, PropertyDescriptor,
};

pub use registry::{
    EntityDefinitionRegistry, RegistryOptions,
};

pub use cipher::{
    DecryptProgress, ReplayCipher, TailPolicy, REPLAY_KEY,
};

pub use compression::Decompressor;

pub use container::{
    open_replay, open_replay_with, ArenaInfo, DecodedReplay, ReplayFile, ReplayHeader,
};

pub use config::UnpackConfig;

pub use error::{
    Result, UnpackError,
};

pub use debug::{
    format_bytes, hex_preview, init_debug_mode, is_debug_enabled, set_debug_mode,
};
