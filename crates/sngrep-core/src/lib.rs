//! SIP/RTP capture core.
//!
//! This crate implements the dissection pipeline, SIP call storage, and
//! RTP/RTCP media stream tracker that sit underneath sngrep's terminal UI.
//! The UI itself, settings persistence, PCAP/WAV export, audio playback and
//! codec decoders are external collaborators — see the crate-level
//! `CaptureEngine` for the seams they attach to.

pub mod address;
pub mod capture;
pub mod config;
pub mod dissect;
pub mod engine;
pub mod error;
pub mod packet;
pub mod storage;
pub mod time;

pub use config::CaptureConfig;
pub use engine::CaptureEngine;
pub use error::{Error, Result};
pub use packet::{Frame, Packet, ProtocolId};
