// Copyright (C) 2024, Cloudflare, Inc.
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

//! Congestion-state machine.
//!
//! Owns the transitions among [`CongestionState`] values and decides when
//! the active algorithm recomputes the slow-start threshold and when the
//! window is allowed to grow. Events arrive from the ack/loss-detection
//! collaborator; window reductions are delegated to [`RecoveryOps`].

use smallvec::SmallVec;

use crate::congestion::CongestionControl;
use crate::congestion::CongestionState;
use crate::congestion::ConnectionState;

/// Window reductions performed on entering and leaving fast recovery.
///
/// The state machine calls `enter_recovery` exactly once per loss episode,
/// after the slow-start threshold has been reassigned, and `exit_recovery`
/// exactly once per return to [`CongestionState::Open`]. Both return the new
/// congestion window, which the machine applies.
pub trait RecoveryOps {
    /// Reduces the window at the start of a loss episode.
    fn enter_recovery(&mut self, state: &mut ConnectionState) -> usize;

    /// Restores the window when the episode's outstanding data has been
    /// fully acknowledged.
    fn exit_recovery(&mut self, state: &mut ConnectionState) -> usize;
}

/// Callback invoked with the old and new state on every transition.
pub type StateChangeCallback = Box<dyn FnMut(CongestionState, CongestionState)>;

/// Drives the congestion state of one connection.
///
/// The state itself lives in [`ConnectionState`]; the machine holds the
/// pluggable algorithm and the transition subscribers.
pub struct CongestionStateMachine {
    cc: Box<dyn CongestionControl>,

    state_listeners: SmallVec<[StateChangeCallback; 1]>,
}

impl CongestionStateMachine {
    /// Creates a machine driving the given algorithm.
    pub fn new(cc: Box<dyn CongestionControl>) -> CongestionStateMachine {
        CongestionStateMachine {
            cc,

            state_listeners: SmallVec::new(),
        }
    }

    /// Name of the active congestion control algorithm.
    pub fn algorithm_name(&self) -> &'static str {
        self.cc.name()
    }

    /// Subscribes to congestion-state transitions. Every effective
    /// transition is reported with its old and new value, in event order.
    pub fn on_state_change(&mut self, cb: StateChangeCallback) {
        self.state_listeners.push(cb);
    }

    /// Returns a machine for a newly accepted connection: the algorithm is
    /// forked, subscriptions are not carried over.
    pub fn fork(&self) -> CongestionStateMachine {
        CongestionStateMachine::new(self.cc.fork())
    }

    fn set_state(
        &mut self, state: &mut ConnectionState, new: CongestionState,
        trace_id: &str,
    ) {
        let old = state.congestion_state();

        if old == new {
            return;
        }

        debug!("{} congestion state {:?} -> {:?}", trace_id, old, new);

        state.set_congestion_state(new);

        for cb in &mut self.state_listeners {
            cb(old, new);
        }
    }

    /// Processes an acknowledgment of `segments_acked` full segments.
    ///
    /// Window growth happens in [`CongestionState::Open`] only. The first
    /// new acknowledgment after a retransmission timeout leaves
    /// [`CongestionState::Loss`] and restarts growth via slow start.
    pub fn on_ack_received(
        &mut self, state: &mut ConnectionState, segments_acked: u32,
        trace_id: &str,
    ) {
        match state.congestion_state() {
            CongestionState::Open => {
                self.cc.increase_window(state, segments_acked);
            },

            CongestionState::Loss if segments_acked > 0 => {
                self.set_state(state, CongestionState::Open, trace_id);
                self.cc.increase_window(state, segments_acked);
            },

            s => {
                // Growth is suspended; any window change comes through the
                // recovery collaborator.
                trace!(
                    "{} ack of {} segments without growth in {:?}",
                    trace_id,
                    segments_acked,
                    s
                );
            },
        }
    }

    /// Processes a duplicate-acknowledgment signal from the detection
    /// collaborator: the first sign of possible loss.
    pub fn on_duplicate_ack(
        &mut self, state: &mut ConnectionState, trace_id: &str,
    ) {
        match state.congestion_state() {
            CongestionState::Open => {
                self.set_state(state, CongestionState::Disorder, trace_id);
            },

            s => trace!("{} duplicate ack absorbed in {:?}", trace_id, s),
        }
    }

    /// Processes a confirmed loss.
    ///
    /// Enters [`CongestionState::Recovery`] exactly once per loss episode:
    /// further loss signals before the episode completes are absorbed. The
    /// threshold is recomputed and assigned before the recovery collaborator
    /// reduces the window.
    pub fn on_loss_detected(
        &mut self, state: &mut ConnectionState, recovery: &mut dyn RecoveryOps,
        trace_id: &str,
    ) {
        match state.congestion_state() {
            CongestionState::Disorder => {
                let ssthresh = self
                    .cc
                    .slow_start_threshold(state, state.bytes_in_flight());

                state.set_ssthresh(ssthresh);
                state.set_cwnd_cnt(0);

                trace!("{} ssthresh={} on loss", trace_id, ssthresh);

                self.set_state(state, CongestionState::Recovery, trace_id);

                let cwnd = recovery.enter_recovery(state);
                state.set_congestion_window(cwnd);
            },

            s @ (CongestionState::Recovery | CongestionState::Loss) => {
                // Expected while an episode is being handled, not an error.
                trace!("{} loss signal absorbed in {:?}", trace_id, s);
            },

            s => {
                debug!(
                    "{} loss signal without preceding disorder in {:?}",
                    trace_id, s
                );
            },
        }
    }

    /// Processes confirmation that all data outstanding at recovery entry
    /// has been acknowledged.
    pub fn on_full_ack(
        &mut self, state: &mut ConnectionState, recovery: &mut dyn RecoveryOps,
        trace_id: &str,
    ) {
        match state.congestion_state() {
            CongestionState::Recovery => {
                let cwnd = recovery.exit_recovery(state);
                state.set_congestion_window(cwnd);

                self.set_state(state, CongestionState::Open, trace_id);
            },

            CongestionState::Cwr => {
                // The reduction ran without a fast-recovery episode, so
                // there is nothing for the recovery collaborator to undo.
                self.set_state(state, CongestionState::Open, trace_id);
            },

            s => trace!("{} full ack absorbed in {:?}", trace_id, s),
        }
    }

    /// Processes an explicit congestion signal: reduce the window without a
    /// full fast-recovery episode.
    pub fn on_explicit_congestion(
        &mut self, state: &mut ConnectionState, trace_id: &str,
    ) {
        match state.congestion_state() {
            CongestionState::Open | CongestionState::Disorder => {
                state.set_cwnd_cnt(0);
                self.set_state(state, CongestionState::Cwr, trace_id);
            },

            s => trace!("{} congestion signal absorbed in {:?}", trace_id, s),
        }
    }

    /// Processes a retransmission-timeout signal, overriding any in-flight
    /// recovery. The window collapse itself belongs to the timeout handler;
    /// only the threshold is reassigned here.
    pub fn on_retransmission_timeout(
        &mut self, state: &mut ConnectionState, trace_id: &str,
    ) {
        if state.congestion_state() == CongestionState::Loss {
            trace!("{} timeout absorbed in Loss", trace_id);
            return;
        }

        let ssthresh =
            self.cc.slow_start_threshold(state, state.bytes_in_flight());

        state.set_ssthresh(ssthresh);
        state.set_cwnd_cnt(0);

        trace!("{} ssthresh={} on timeout", trace_id, ssthresh);

        self.set_state(state, CongestionState::Loss, trace_id);
    }
}

impl std::fmt::Debug for CongestionStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "algo={} listeners={}",
            self.cc.name(),
            self.state_listeners.len()
        )
    }
}
