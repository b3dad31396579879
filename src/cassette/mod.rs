//! Record/replay cassettes for port interactions.
//!
//! A cassette is a YAML file holding the ordered interactions of one or
//! more ports. Recording adapters append to a [`recorder::CassetteRecorder`];
//! replaying adapters serve answers from a [`replayer::CassetteReplayer`].

pub mod config;
pub mod format;
pub mod recorder;
pub mod replayer;
pub mod session;
