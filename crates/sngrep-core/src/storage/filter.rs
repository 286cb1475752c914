//! Filter engine (C12): a set of per-field predicates, compiled once per
//! change and evaluated with short-circuit semantics.
//!
//! Grounded on `original_source/src/ui_filter.c`/`.h` (per-field filter
//! concept).

use crate::dissect::sip::SipMethod;
use crate::packet::{ProtoData, ProtocolId};

use super::Call;

/// A single field predicate. Each variant matching is a plain substring or
/// set test — no regex, matching the original's filter surface.
#[derive(Debug, Clone)]
enum Predicate {
    SipFrom(String),
    SipTo(String),
    Source(String),
    Destination(String),
    Payload(String),
    Method(Vec<SipMethod>),
    Display(String),
}

/// User-facing filter configuration, one optional value per field.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub sip_from: Option<String>,
    pub sip_to: Option<String>,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub payload: Option<String>,
    pub method: Option<Vec<SipMethod>>,
    pub display: Option<String>,
}

/// A compiled filter, ready to evaluate against calls. Compilation happens
/// once when the filter changes, not on every `matches` call (spec §4.11
/// Design Note).
#[derive(Debug, Clone, Default)]
pub struct FilterEngine {
    predicates: Vec<Predicate>,
}

impl FilterEngine {
    pub fn compile(filter: &Filter) -> Self {
        let mut predicates = Vec::new();
        if let Some(v) = &filter.sip_from {
            predicates.push(Predicate::SipFrom(v.to_lowercase()));
        }
        if let Some(v) = &filter.sip_to {
            predicates.push(Predicate::SipTo(v.to_lowercase()));
        }
        if let Some(v) = &filter.source {
            predicates.push(Predicate::Source(v.to_lowercase()));
        }
        if let Some(v) = &filter.destination {
            predicates.push(Predicate::Destination(v.to_lowercase()));
        }
        if let Some(v) = &filter.payload {
            predicates.push(Predicate::Payload(v.to_lowercase()));
        }
        if let Some(v) = &filter.method {
            predicates.push(Predicate::Method(v.clone()));
        }
        if let Some(v) = &filter.display {
            predicates.push(Predicate::Display(v.to_lowercase()));
        }
        Self { predicates }
    }

    /// True iff every compiled predicate matches at least one message of
    /// `call` (or the call itself, for call-scoped predicates).
    pub fn matches(&self, call: &Call) -> bool {
        self.predicates.iter().all(|p| self.matches_one(p, call))
    }

    fn matches_one(&self, predicate: &Predicate, call: &Call) -> bool {
        match predicate {
            Predicate::SipFrom(needle) => call
                .messages
                .iter()
                .any(|m| m.src.to_string().to_lowercase().contains(needle.as_str())),
            Predicate::SipTo(needle) => call
                .messages
                .iter()
                .any(|m| m.dst.to_string().to_lowercase().contains(needle.as_str())),
            Predicate::Source(needle) => call
                .messages
                .iter()
                .any(|m| m.src.ip().to_lowercase().contains(needle.as_str())),
            Predicate::Destination(needle) => call
                .messages
                .iter()
                .any(|m| m.dst.ip().to_lowercase().contains(needle.as_str())),
            Predicate::Payload(needle) => call.messages.iter().any(|m| {
                matches!(
                    m.packet.protocol_data(ProtocolId::Sip),
                    Some(ProtoData::Sip(sip))
                        if String::from_utf8_lossy(&sip.raw).to_lowercase().contains(needle.as_str())
                )
            }),
            Predicate::Method(methods) => call
                .messages
                .iter()
                .any(|m| m.method.map(|mm| methods.contains(&mm)).unwrap_or(false)),
            Predicate::Display(needle) => call.id.to_lowercase().contains(needle.as_str()),
        }
    }
}
