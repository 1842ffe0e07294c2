use std::fmt;

/// paramType identifies a parameter inside INIT/INIT-ACK and RECONFIG chunks
#[derive(Debug, Copy, Clone, PartialEq)]
#[repr(C)]
pub(crate) enum ParamType {
    /// Heartbeat Info (RFC 4960)
    HeartbeatInfo,
    /// State Cookie (RFC 4960)
    StateCookie,
    /// Unrecognized Parameters (RFC 4960)
    UnrecognizedParam,
    /// Outgoing SSN Reset Request Parameter (RFC 6525)
    OutSsnResetReq,
    /// Incoming SSN Reset Request Parameter (RFC 6525)
    IncSsnResetReq,
    /// SSN/TSN Reset Request Parameter (RFC 6525)
    SsnTsnResetReq,
    /// Re-configuration Response Parameter (RFC 6525)
    ReconfigResp,
    /// Add Outgoing Streams Request Parameter (RFC 6525)
    AddOutStreamsReq,
    /// Add Incoming Streams Request Parameter (RFC 6525)
    AddIncStreamsReq,
    /// Supported Extensions (0x8008) (RFC 5061)
    SupportedExt,
    /// Forward TSN supported (0xC000) (RFC 3758)
    ForwardTsnSupp,
    Unknown { param_type: u16 },
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            ParamType::HeartbeatInfo => "Heartbeat Info",
            ParamType::StateCookie => "State Cookie",
            ParamType::UnrecognizedParam => "Unrecognized Parameters",
            ParamType::OutSsnResetReq => "Outgoing SSN Reset Request Parameter",
            ParamType::IncSsnResetReq => "Incoming SSN Reset Request Parameter",
            ParamType::SsnTsnResetReq => "SSN/TSN Reset Request Parameter",
            ParamType::ReconfigResp => "Re-configuration Response Parameter",
            ParamType::AddOutStreamsReq => "Add Outgoing Streams Request Parameter",
            ParamType::AddIncStreamsReq => "Add Incoming Streams Request Parameter",
            ParamType::SupportedExt => "Supported Extensions",
            ParamType::ForwardTsnSupp => "Forward TSN supported",
            _ => "Unknown ParamType",
        };
        write!(f, "{s}")
    }
}

impl From<u16> for ParamType {
    fn from(v: u16) -> ParamType {
        match v {
            1 => ParamType::HeartbeatInfo,
            7 => ParamType::StateCookie,
            8 => ParamType::UnrecognizedParam,
            13 => ParamType::OutSsnResetReq,
            14 => ParamType::IncSsnResetReq,
            15 => ParamType::SsnTsnResetReq,
            16 => ParamType::ReconfigResp,
            17 => ParamType::AddOutStreamsReq,
            18 => ParamType::AddIncStreamsReq,
            32776 => ParamType::SupportedExt,
            49152 => ParamType::ForwardTsnSupp,
            unknown => ParamType::Unknown {
                param_type: unknown,
            },
        }
    }
}

impl From<ParamType> for u16 {
    fn from(v: ParamType) -> u16 {
        match v {
            ParamType::HeartbeatInfo => 1,
            ParamType::StateCookie => 7,
            ParamType::UnrecognizedParam => 8,
            ParamType::OutSsnResetReq => 13,
            ParamType::IncSsnResetReq => 14,
            ParamType::SsnTsnResetReq => 15,
            ParamType::ReconfigResp => 16,
            ParamType::AddOutStreamsReq => 17,
            ParamType::AddIncStreamsReq => 18,
            ParamType::SupportedExt => 32776,
            ParamType::ForwardTsnSupp => 49152,
            ParamType::Unknown { param_type } => param_type,
        }
    }
}
