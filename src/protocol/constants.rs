use std::ops::RangeInclusive;

/* Header Consts */
/// The only protocol version spoken by the service.
pub const PROTOCOL_VERSION: u8 = 0b0001;
/// Header size in 4-byte words for every frame this client emits.
pub const DEFAULT_HEADER_SIZE_WORDS: u8 = 0b0001;
/// Length of the fixed header, in bytes.
pub const FIXED_HEADER_LENGTH: usize = 4;
/// Width of the optional sequence / error code field and the payload length field.
pub const FIELD_LENGTH: usize = 4;
/// The maximum payload length accepted in a single frame.
pub const MAX_PAYLOAD_LENGTH: usize = 16 * 1024 * 1024;

/* Message Type Consts */
pub const FULL_CLIENT_REQUEST: u8 = 0b0001;
pub const AUDIO_ONLY_REQUEST: u8 = 0b0010;
pub const FULL_SERVER_RESPONSE: u8 = 0b1001;
pub const SERVER_ACK: u8 = 0b1011;
pub const SERVER_ERROR_RESPONSE: u8 = 0b1111;

/* Message Flag Consts */
pub const NO_SEQUENCE: u8 = 0b0000;
pub const POS_SEQUENCE: u8 = 0b0001;
pub const NEG_SEQUENCE: u8 = 0b0010;
pub const NEG_WITH_SEQUENCE: u8 = 0b0011;

/* Serialization Consts */
pub const NO_SERIALIZATION: u8 = 0b0000;
pub const JSON_SERIALIZATION: u8 = 0b0001;

/* Compression Consts */
pub const NO_COMPRESSION: u8 = 0b0000;
pub const GZIP_COMPRESSION: u8 = 0b0001;

/* Service Error Codes */
pub const ERROR_SUCCESS: u32 = 20000000;
/// Success code reported by the legacy service generation.
pub const LEGACY_SUCCESS: u32 = 1000;
pub const ERROR_INVALID_PARAMS: u32 = 45000001;
pub const ERROR_EMPTY_AUDIO: u32 = 45000002;
pub const ERROR_PACKET_TIMEOUT: u32 = 45000081;
pub const ERROR_INVALID_AUDIO_FORMAT: u32 = 45000151;
pub const ERROR_UNAUTHORIZED: u32 = 45000003;
pub const ERROR_FORBIDDEN: u32 = 45000004;
pub const ERROR_NOT_FOUND: u32 = 45000005;
pub const ERROR_TIMEOUT: u32 = 45000006;
pub const ERROR_UNKNOWN: u32 = 45000007;
pub const ERROR_SERVER_BUSY: u32 = 55000031;
pub const ERROR_SERVER_INTERNAL: u32 = 55000001;
pub const ERROR_SERVICE_UNAVAILABLE: u32 = 55000002;
pub const ERROR_QUOTA_EXCEEDED: u32 = 55000003;
pub const ERROR_RATE_LIMITED: u32 = 55000004;
pub const ERROR_CLIENT_RANGE: RangeInclusive<u32> = 45000000..=45999999;
pub const ERROR_SERVER_RANGE: RangeInclusive<u32> = 55000000..=55999999;

/* Endpoint Defaults */
pub const DEFAULT_URL: &str = "wss://openspeech.bytedance.com/api/v3/sauc/bigmodel";
pub const DEFAULT_RESOURCE_ID: &str = "volc.bigasr.sauc.duration";
/// Response header carrying the server-side trace id.
pub const LOG_ID_HEADER: &str = "X-Tt-Logid";

/* Auth Header Names */
pub const HEADER_RESOURCE_ID: &str = "X-Api-Resource-Id";
pub const HEADER_ACCESS_KEY: &str = "X-Api-Access-Key";
pub const HEADER_APP_KEY: &str = "X-Api-App-Key";
pub const HEADER_REQUEST_ID: &str = "X-Api-Request-Id";
pub const HEADER_AUTHORIZATION: &str = "Authorization";
