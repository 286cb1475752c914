//! Attribute system (C11): a fixed table of named, on-demand value
//! functions over a call (and, where noted, its last message).
//!
//! Grounded on `original_source/src/sip.h` (`sip_attr_hdr_t`, `sip_attr_id`,
//! `sip_attr_get_name`/`sip_attr_from_name`).

use super::{Call, CallState};

/// Stable attribute identifiers — the string form is what a persisted
/// column configuration would reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeId {
    CallId,
    SipFrom,
    SipTo,
    Source,
    Destination,
    MessageCount,
    Method,
    CSeq,
    Starting,
    State,
    Duration,
    ConversationDuration,
}

/// A color a terminal UI would render an attribute's value in. Kept as a
/// plain enum here — the capture core has no terminal rendering concerns
/// of its own, but the color *rule* is part of this attribute's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorRule {
    None,
    Success,
    Warning,
    Error,
}

/// One attribute's name, column title, and value function.
pub struct AttributeDescriptor {
    pub id: AttributeId,
    pub name: &'static str,
    pub title: &'static str,
    pub column_width: u16,
    pub value: fn(&Call) -> String,
    pub color: fn(&Call) -> ColorRule,
}

fn no_color(_call: &Call) -> ColorRule {
    ColorRule::None
}

fn response_color(call: &Call) -> ColorRule {
    match call.state() {
        CallState::Rejected => ColorRule::Error,
        CallState::InCall | CallState::Completed => ColorRule::Success,
        CallState::Proceeding | CallState::Calling => ColorRule::Warning,
        CallState::Canceled | CallState::Unknown => ColorRule::None,
    }
}

fn value_callid(call: &Call) -> String {
    call.id.to_string()
}

fn value_sipfrom(call: &Call) -> String {
    call.messages
        .first()
        .map(|m| m.src.to_string())
        .unwrap_or_default()
}

fn value_sipto(call: &Call) -> String {
    call.messages
        .first()
        .map(|m| m.dst.to_string())
        .unwrap_or_default()
}

fn value_source(call: &Call) -> String {
    call.messages
        .last()
        .map(|m| m.src.to_string())
        .unwrap_or_default()
}

fn value_destination(call: &Call) -> String {
    call.messages
        .last()
        .map(|m| m.dst.to_string())
        .unwrap_or_default()
}

fn value_msgcnt(call: &Call) -> String {
    call.messages.len().to_string()
}

fn value_method(call: &Call) -> String {
    call.messages
        .last()
        .and_then(|m| m.method)
        .map(|m| m.name().to_string())
        .unwrap_or_else(|| {
            call.messages
                .last()
                .and_then(|m| m.status_code)
                .map(|c| c.to_string())
                .unwrap_or_default()
        })
}

fn value_cseq(call: &Call) -> String {
    call.messages
        .last()
        .and_then(|m| m.cseq)
        .map(|c| c.to_string())
        .unwrap_or_default()
}

fn value_starting(call: &Call) -> String {
    call.starting_method()
        .map(|m| m.name().to_string())
        .unwrap_or_default()
}

fn value_state(call: &Call) -> String {
    format!("{:?}", call.state())
}

fn value_duration(call: &Call) -> String {
    format!("{:.3}s", call.duration_usec() as f64 / 1_000_000.0)
}

fn value_convdur(call: &Call) -> String {
    value_duration(call)
}

/// The fixed attribute table, in display order.
pub static ATTRIBUTES: &[AttributeDescriptor] = &[
    AttributeDescriptor {
        id: AttributeId::CallId,
        name: "callid",
        title: "Call-ID",
        column_width: 36,
        value: value_callid,
        color: no_color,
    },
    AttributeDescriptor {
        id: AttributeId::SipFrom,
        name: "sipfrom",
        title: "From",
        column_width: 24,
        value: value_sipfrom,
        color: no_color,
    },
    AttributeDescriptor {
        id: AttributeId::SipTo,
        name: "sipto",
        title: "To",
        column_width: 24,
        value: value_sipto,
        color: no_color,
    },
    AttributeDescriptor {
        id: AttributeId::Source,
        name: "src",
        title: "Source",
        column_width: 22,
        value: value_source,
        color: no_color,
    },
    AttributeDescriptor {
        id: AttributeId::Destination,
        name: "dst",
        title: "Destination",
        column_width: 22,
        value: value_destination,
        color: no_color,
    },
    AttributeDescriptor {
        id: AttributeId::MessageCount,
        name: "msgcnt",
        title: "Msgs",
        column_width: 5,
        value: value_msgcnt,
        color: no_color,
    },
    AttributeDescriptor {
        id: AttributeId::Method,
        name: "method",
        title: "Method",
        column_width: 10,
        value: value_method,
        color: response_color,
    },
    AttributeDescriptor {
        id: AttributeId::CSeq,
        name: "cseq",
        title: "CSeq",
        column_width: 6,
        value: value_cseq,
        color: no_color,
    },
    AttributeDescriptor {
        id: AttributeId::Starting,
        name: "starting",
        title: "Starts",
        column_width: 10,
        value: value_starting,
        color: no_color,
    },
    AttributeDescriptor {
        id: AttributeId::State,
        name: "state",
        title: "State",
        column_width: 10,
        value: value_state,
        color: response_color,
    },
    AttributeDescriptor {
        id: AttributeId::Duration,
        name: "duration",
        title: "Duration",
        column_width: 10,
        value: value_duration,
        color: no_color,
    },
    AttributeDescriptor {
        id: AttributeId::ConversationDuration,
        name: "convdur",
        title: "Conv. Dur.",
        column_width: 10,
        value: value_convdur,
        color: no_color,
    },
];

/// Look up a descriptor by its persisted name (`sip_attr_from_name`).
pub fn by_name(name: &str) -> Option<&'static AttributeDescriptor> {
    ATTRIBUTES.iter().find(|a| a.name == name)
}
