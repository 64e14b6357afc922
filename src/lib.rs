// Copyright (C) 2018-2019, Cloudflare, Inc.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright notice,
//       this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above copyright
//       notice, this list of conditions and the following disclaimer in the
//       documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS
// IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO,
// THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR
// PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR
// CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! TCP congestion control building blocks.
//!
//! This crate implements the pieces of a TCP sender that react to
//! acknowledgment and loss events: interchangeable congestion control
//! algorithms behind a common contract, the Reno algorithm, and the
//! congestion-state machine that decides when the algorithm grows the window
//! and when the slow-start threshold is recomputed. Everything else a full
//! connection needs (segment framing, retransmission timers, selective
//! acknowledgment processing, RTT estimation) is an external collaborator
//! feeding events into this subsystem.
//!
//! ## Connection setup
//!
//! A connection starts from a configuration object:
//!
//! ```
//! let mut config = tcp_cc::Config::new();
//! config.set_cc_algorithm(tcp_cc::CongestionControlAlgorithm::Reno);
//! config.set_segment_size(1460);
//! config.set_initial_congestion_window_segments(10);
//!
//! let state = tcp_cc::ConnectionState::from_config(&config)?;
//! # drop(state);
//! # Ok::<(), tcp_cc::Error>(())
//! ```
//!
//! The algorithm can also be selected by name:
//!
//! ```
//! let mut config = tcp_cc::Config::new();
//! config.set_cc_algorithm_name("reno")?;
//! # Ok::<(), tcp_cc::Error>(())
//! ```
//!
//! ## Event processing
//!
//! The state machine consumes events and mutates the connection state:
//!
//! ```
//! use tcp_cc::CongestionState;
//!
//! let mut config = tcp_cc::Config::new();
//! config.set_segment_size(1460);
//!
//! let mut state = tcp_cc::ConnectionState::from_config(&config)?;
//!
//! let cc = tcp_cc::new_congestion_control(config.cc_algorithm());
//! let mut machine = tcp_cc::CongestionStateMachine::new(cc);
//!
//! // Two full segments newly acknowledged: the window grows.
//! machine.on_ack_received(&mut state, 2, "example");
//! assert_eq!(state.congestion_state(), CongestionState::Open);
//!
//! // A duplicate acknowledgment is the first sign of possible loss.
//! machine.on_duplicate_ack(&mut state, "example");
//! assert_eq!(state.congestion_state(), CongestionState::Disorder);
//! # Ok::<(), tcp_cc::Error>(())
//! ```
//!
//! Confirmed losses additionally involve a [`RecoveryOps`] collaborator that
//! performs the actual window reduction, and every state transition can be
//! observed through [`CongestionStateMachine::on_state_change`].

#[macro_use]
extern crate log;

pub use crate::congestion::machine::CongestionStateMachine;
pub use crate::congestion::machine::RecoveryOps;
pub use crate::congestion::machine::StateChangeCallback;
pub use crate::congestion::new_congestion_control;
pub use crate::congestion::CongestionControl;
pub use crate::congestion::CongestionControlAlgorithm;
pub use crate::congestion::CongestionState;
pub use crate::congestion::ConnectionState;
pub use crate::error::Error;
pub use crate::error::Result;

use std::str::FromStr;
use std::time::Duration;

use crate::congestion::INITIAL_WINDOW_SEGMENTS;

const DEFAULT_SEGMENT_SIZE: usize = 536;

const DEFAULT_MIN_RTO: Duration = Duration::from_secs(1);

/// Stores configuration shared between multiple connections.
pub struct Config {
    cc_algorithm: CongestionControlAlgorithm,

    segment_size: usize,

    initial_window_segments: usize,

    initial_ssthresh: Option<usize>,

    min_rto: Duration,

    sack_enabled: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}

impl Config {
    /// Creates a config object with default values.
    pub fn new() -> Config {
        Config {
            cc_algorithm: CongestionControlAlgorithm::Reno,

            segment_size: DEFAULT_SEGMENT_SIZE,

            initial_window_segments: INITIAL_WINDOW_SEGMENTS,

            initial_ssthresh: None,

            min_rto: DEFAULT_MIN_RTO,

            sack_enabled: true,
        }
    }

    /// Sets the congestion control algorithm used.
    ///
    /// The default value is `CongestionControlAlgorithm::Reno`.
    pub fn set_cc_algorithm(&mut self, algo: CongestionControlAlgorithm) {
        self.cc_algorithm = algo;
    }

    /// Sets the congestion control algorithm used by string.
    ///
    /// The default value is `reno`. On error `Error::CongestionControl` is
    /// returned.
    pub fn set_cc_algorithm_name(&mut self, name: &str) -> Result<()> {
        self.cc_algorithm = CongestionControlAlgorithm::from_str(name)?;

        Ok(())
    }

    /// The configured congestion control algorithm.
    pub fn cc_algorithm(&self) -> CongestionControlAlgorithm {
        self.cc_algorithm
    }

    /// Sets the segment size (MSS), in bytes.
    ///
    /// A zero value is rejected at connection setup.
    pub fn set_segment_size(&mut self, segment_size: usize) {
        self.segment_size = segment_size;
    }

    /// Sets the initial congestion window, in segments.
    ///
    /// The default value is 10.
    pub fn set_initial_congestion_window_segments(&mut self, segments: usize) {
        self.initial_window_segments = segments;
    }

    /// Sets the initial slow-start threshold, in bytes.
    ///
    /// When unset the threshold starts effectively unbounded, keeping the
    /// connection in slow start. Values below two segments are rejected at
    /// connection setup.
    pub fn set_initial_ssthresh(&mut self, ssthresh: usize) {
        self.initial_ssthresh = Some(ssthresh);
    }

    /// Sets the minimum retransmission timeout.
    ///
    /// Read once at connection setup and handed to the retransmission-timer
    /// collaborator; opaque to the congestion subsystem.
    pub fn set_min_rto(&mut self, min_rto: Duration) {
        self.min_rto = min_rto;
    }

    /// Configures whether selective acknowledgments are enabled.
    ///
    /// The default value is `true`. Opaque to the congestion subsystem.
    pub fn enable_sack(&mut self, v: bool) {
        self.sack_enabled = v;
    }
}

mod congestion;
mod error;

#[cfg(test)]
mod harness;
