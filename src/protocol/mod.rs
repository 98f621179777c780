//! Wire codecs: pure encode/decode, no I/O
//!
//! Two protocols live here: the binary command/response protocol spoken by
//! the inertial sensors over serial ([`threespace`]) and the line-oriented
//! command protocol plus fixed-width float framing of the EMG base station
//! over TCP ([`trigno`]).

pub mod threespace;
pub mod trigno;
