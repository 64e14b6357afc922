// Copyright (C) 2019, Cloudflare, Inc.
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

use std::cmp;
use std::fmt::Debug;
use std::str::FromStr;
use std::time::Duration;

use crate::Config;
use crate::Error;
use crate::Result;

/// Initial congestion window size, in segments.
pub const INITIAL_WINDOW_SEGMENTS: usize = 10;

/// Floor of the congestion window after a reduction, in segments.
pub const MINIMUM_WINDOW_SEGMENTS: usize = 2;

/// Congestion state of a connection.
///
/// The state lives in [`ConnectionState`] but is only ever changed by the
/// [`CongestionStateMachine`](machine::CongestionStateMachine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionState {
    /// Normal operation, window growth allowed.
    Open,

    /// Out-of-order or duplicate acknowledgments observed, loss not yet
    /// confirmed.
    Disorder,

    /// Window reduction in response to an explicit congestion signal,
    /// without a full fast-recovery episode.
    Cwr,

    /// Fast recovery from a confirmed loss is in progress.
    Recovery,

    /// A retransmission timeout fired; the most severe state.
    Loss,
}

impl CongestionState {
    /// Whether a loss episode is currently being handled.
    pub fn in_recovery(self) -> bool {
        matches!(self, CongestionState::Recovery | CongestionState::Loss)
    }
}

/// Per-connection window and threshold state.
///
/// A connection owns exactly one of these; algorithms and the state machine
/// borrow it for the duration of a single event. Cloning is only meant for
/// the accept path, where a listening socket spawns state for a new peer.
#[derive(Clone)]
pub struct ConnectionState {
    segment_size: usize,

    congestion_window: usize,

    ssthresh: usize,

    cwnd_cnt: u32,

    bytes_in_flight: usize,

    congestion_state: CongestionState,

    min_rto: Duration,

    sack_enabled: bool,
}

impl ConnectionState {
    /// Creates connection state from a [`Config`].
    ///
    /// Returns [`Error::InvalidConfig`] if the segment size is zero, the
    /// initial window is empty, or the initial slow-start threshold is below
    /// two segments.
    pub fn from_config(config: &Config) -> Result<ConnectionState> {
        let segment_size = config.segment_size;

        if segment_size == 0 || config.initial_window_segments == 0 {
            return Err(Error::InvalidConfig);
        }

        let ssthresh = config.initial_ssthresh.unwrap_or(usize::MAX);

        if ssthresh < MINIMUM_WINDOW_SEGMENTS * segment_size {
            return Err(Error::InvalidConfig);
        }

        Ok(ConnectionState {
            segment_size,

            congestion_window: segment_size * config.initial_window_segments,

            ssthresh,

            cwnd_cnt: 0,

            bytes_in_flight: 0,

            congestion_state: CongestionState::Open,

            min_rto: config.min_rto,

            sack_enabled: config.sack_enabled,
        })
    }

    /// Bytes per full segment (MSS). Fixed for the connection's lifetime.
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Current congestion window, in bytes.
    pub fn congestion_window(&self) -> usize {
        self.congestion_window
    }

    /// Sets the congestion window, clamping to the one-segment floor.
    pub fn set_congestion_window(&mut self, cwnd: usize) {
        debug_assert!(
            cwnd >= self.segment_size,
            "cwnd {} below segment size {}",
            cwnd,
            self.segment_size
        );

        self.congestion_window = cmp::max(cwnd, self.segment_size);
    }

    /// Current slow-start threshold, in bytes.
    pub fn ssthresh(&self) -> usize {
        self.ssthresh
    }

    /// Sets the slow-start threshold, clamping to the two-segment floor.
    pub fn set_ssthresh(&mut self, ssthresh: usize) {
        let floor = MINIMUM_WINDOW_SEGMENTS * self.segment_size;

        debug_assert!(
            ssthresh >= floor,
            "ssthresh {ssthresh} below floor {floor}"
        );

        self.ssthresh = cmp::max(ssthresh, floor);
    }

    /// Fractional-growth accumulator used during congestion avoidance.
    pub fn cwnd_cnt(&self) -> u32 {
        self.cwnd_cnt
    }

    /// Sets the fractional-growth accumulator.
    pub fn set_cwnd_cnt(&mut self, cwnd_cnt: u32) {
        self.cwnd_cnt = cwnd_cnt;
    }

    /// Bytes sent but not yet acknowledged, as reported by the sender's
    /// bookkeeping.
    pub fn bytes_in_flight(&self) -> usize {
        self.bytes_in_flight
    }

    /// Updates the in-flight byte count. Called by the sender bookkeeping,
    /// read-only to this subsystem.
    pub fn set_bytes_in_flight(&mut self, bytes_in_flight: usize) {
        self.bytes_in_flight = bytes_in_flight;
    }

    /// Current congestion state.
    pub fn congestion_state(&self) -> CongestionState {
        self.congestion_state
    }

    pub(crate) fn set_congestion_state(&mut self, state: CongestionState) {
        self.congestion_state = state;
    }

    /// Whether the connection is in the slow-start growth regime.
    pub fn in_slow_start(&self) -> bool {
        self.congestion_window < self.ssthresh
    }

    /// Minimum retransmission timeout configured for the connection. Opaque
    /// to this subsystem; consumed by the retransmission timer collaborator.
    pub fn min_rto(&self) -> Duration {
        self.min_rto
    }

    /// Whether selective acknowledgments are enabled. Opaque to this
    /// subsystem.
    pub fn sack_enabled(&self) -> bool {
        self.sack_enabled
    }
}

impl std::fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "cwnd={} ssthresh={} cwnd_cnt={} bytes_in_flight={} state={:?}",
            self.congestion_window,
            self.ssthresh,
            self.cwnd_cnt,
            self.bytes_in_flight,
            self.congestion_state,
        )
    }
}

/// Available congestion control algorithms.
///
/// This enum provides currently available list of congestion control
/// algorithms.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CongestionControlAlgorithm {
    /// Reno congestion control algorithm (default). `reno` in a string form.
    Reno = 0,
}

impl FromStr for CongestionControlAlgorithm {
    type Err = crate::Error;

    /// Converts a string to `CongestionControlAlgorithm`.
    ///
    /// If `name` is not valid, `Error::CongestionControl` is returned.
    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        match name {
            "reno" => Ok(CongestionControlAlgorithm::Reno),

            _ => Err(crate::Error::CongestionControl),
        }
    }
}

/// A congestion control algorithm, held polymorphically by a connection.
///
/// Implementations keep no per-connection counters of their own: everything
/// that evolves with the connection lives in [`ConnectionState`], so a
/// stateless implementation can be shared and a configured one forked.
pub trait CongestionControl
where
    Self: Debug,
{
    /// Stable identifier of the algorithm, for observability.
    fn name(&self) -> &'static str;

    /// Grows the congestion window in response to `segments_acked` newly
    /// acknowledged full segments. Calling with `segments_acked == 0` is a
    /// no-op.
    fn increase_window(
        &mut self, state: &mut ConnectionState, segments_acked: u32,
    );

    /// Returns the slow-start threshold to apply on a loss event. Pure: the
    /// caller is responsible for assigning the result to the connection
    /// state.
    fn slow_start_threshold(
        &self, state: &ConnectionState, bytes_in_flight: usize,
    ) -> usize;

    /// Returns an independently owned instance with identical configuration.
    /// Mutations of the fork are never observable through the original.
    fn fork(&self) -> Box<dyn CongestionControl>;
}

/// Returns a congestion control module for the given algorithm.
pub fn new_congestion_control(
    algo: CongestionControlAlgorithm,
) -> Box<dyn CongestionControl> {
    trace!("congestion control initialized: {:?}", algo);

    match algo {
        CongestionControlAlgorithm::Reno => Box::new(reno::Reno::default()),
    }
}

pub mod machine;
mod reno;
