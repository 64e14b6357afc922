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

//! Scripted sender/receiver harness for end-to-end validation.
//!
//! Drives a whole transfer through the state machine with configurable
//! sequence-number drops, the way the excluded connection machinery would:
//! cumulative acknowledgments, duplicate-ack counting with fast retransmit
//! on the third duplicate, and limited transmit of up to two segments beyond
//! the window while duplicate acks are arriving. Acks are delivered
//! immediately after each segment, so all events stay in one global order.

use std::cell::RefCell;
use std::cmp;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::Duration;

use smallvec::SmallVec;

use crate::congestion::machine::CongestionStateMachine;
use crate::congestion::machine::RecoveryOps;
use crate::congestion::new_congestion_control;
use crate::congestion::CongestionState;
use crate::congestion::ConnectionState;
use crate::Config;

const TRACE_ID: &str = "harness";

const SEGMENT_SIZE: u64 = 100;

const APP_SEGMENT_COUNT: u64 = 200;

const DUP_ACK_THRESHOLD: u32 = 3;

/// Drops configured sequence numbers on their first transit and reports
/// each drop's identity to the registered callback.
struct SeqErrorModel {
    seqs_to_kill: SmallVec<[u64; 4]>,

    drop_cb: Option<Box<dyn FnMut(u64)>>,
}

impl SeqErrorModel {
    fn new(seqs: &[u64]) -> SeqErrorModel {
        SeqErrorModel {
            seqs_to_kill: seqs.iter().copied().collect(),

            drop_cb: None,
        }
    }

    fn set_drop_callback(&mut self, cb: Box<dyn FnMut(u64)>) {
        self.drop_cb = Some(cb);
    }

    /// Returns true if the segment starting at `seq` must be dropped.
    /// Each configured sequence number is killed once; retransmissions
    /// pass.
    fn intercept(&mut self, seq: u64) -> bool {
        let Some(pos) = self.seqs_to_kill.iter().position(|&s| s == seq)
        else {
            return false;
        };

        self.seqs_to_kill.remove(pos);

        trace!("{} dropping seq {}", TRACE_ID, seq);

        if let Some(cb) = &mut self.drop_cb {
            cb(seq);
        }

        true
    }
}

/// Classic-halving stand-in for the out-of-scope recovery algorithm: the
/// window is pinned to the (already halved) threshold on entry and exit.
#[derive(Default)]
struct ClassicRecovery {
    entries: usize,
    exits: usize,
}

impl RecoveryOps for ClassicRecovery {
    fn enter_recovery(&mut self, state: &mut ConnectionState) -> usize {
        self.entries += 1;
        state.ssthresh()
    }

    fn exit_recovery(&mut self, state: &mut ConnectionState) -> usize {
        self.exits += 1;
        state.ssthresh()
    }
}

struct TestTransfer {
    state: ConnectionState,
    machine: CongestionStateMachine,
    recovery: ClassicRecovery,
    error_model: SeqErrorModel,

    /// Next sequence number of new data; data occupies `1..end()`.
    tx_next: u64,
    /// Lowest unacknowledged sequence number.
    snd_una: u64,
    dup_acks: u32,
    /// Highest sequence sent when the current loss episode began.
    recovery_point: u64,

    /// Receiver: next in-order sequence expected, plus the out-of-order
    /// buffer.
    rcv_next: u64,
    reorder_buf: BTreeSet<u64>,

    /// `Disorder -> Recovery` transitions observed through the state trace.
    recovery_transitions: Rc<RefCell<usize>>,
    /// Sequence numbers reported by the drop callback, in drop order.
    dropped: Rc<RefCell<Vec<u64>>>,
}

impl TestTransfer {
    fn new(seqs_to_kill: &[u64]) -> TestTransfer {
        let mut config = Config::new();
        config.set_segment_size(SEGMENT_SIZE as usize);
        config.set_initial_congestion_window_segments(10);
        config.set_min_rto(Duration::from_secs(10));
        config.enable_sack(false);

        let state = ConnectionState::from_config(&config).unwrap();

        let mut machine = CongestionStateMachine::new(
            new_congestion_control(config.cc_algorithm()),
        );

        let recovery_transitions = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&recovery_transitions);

        machine.on_state_change(Box::new(move |old, new| {
            if old == CongestionState::Disorder &&
                new == CongestionState::Recovery
            {
                *sink.borrow_mut() += 1;
            }
        }));

        let mut error_model = SeqErrorModel::new(seqs_to_kill);

        let dropped = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&dropped);

        error_model.set_drop_callback(Box::new(move |seq| {
            sink.borrow_mut().push(seq);
        }));

        TestTransfer {
            state,
            machine,
            recovery: ClassicRecovery::default(),
            error_model,

            tx_next: 1,
            snd_una: 1,
            dup_acks: 0,
            recovery_point: 0,

            rcv_next: 1,
            reorder_buf: BTreeSet::new(),

            recovery_transitions,
            dropped,
        }
    }

    fn end(&self) -> u64 {
        1 + APP_SEGMENT_COUNT * SEGMENT_SIZE
    }

    fn sync_in_flight(&mut self) {
        self.state
            .set_bytes_in_flight((self.tx_next - self.snd_una) as usize);
    }

    /// Whether the window (plus limited transmit while duplicate acks are
    /// arriving) admits one more segment.
    fn can_send(&self) -> bool {
        let in_flight = (self.tx_next - self.snd_una) as usize;

        let limit = self.state.congestion_window() +
            cmp::min(self.dup_acks, 2) as usize * SEGMENT_SIZE as usize;

        in_flight + SEGMENT_SIZE as usize <= limit
    }

    /// Runs the transfer to completion.
    fn run(&mut self) {
        let end = self.end();

        let mut steps_left = 100 * APP_SEGMENT_COUNT;

        while self.snd_una < end {
            assert!(steps_left > 0, "transfer stalled: {:?}", self.state);
            steps_left -= 1;

            assert!(
                self.tx_next < end && self.can_send(),
                "sender blocked: {:?}",
                self.state
            );

            let seq = self.tx_next;
            self.tx_next += SEGMENT_SIZE;
            self.sync_in_flight();

            self.transmit(seq);
        }

        assert_eq!(self.rcv_next, end);
        assert!(self.error_model.seqs_to_kill.is_empty());
    }

    fn transmit(&mut self, seq: u64) {
        if self.error_model.intercept(seq) {
            return;
        }

        self.deliver(seq);
    }

    /// Receiver side: in-order delivery with reorder buffering, followed by
    /// an immediate cumulative acknowledgment.
    fn deliver(&mut self, seq: u64) {
        if seq == self.rcv_next {
            self.rcv_next += SEGMENT_SIZE;

            while self.reorder_buf.remove(&self.rcv_next) {
                self.rcv_next += SEGMENT_SIZE;
            }
        } else if seq > self.rcv_next {
            self.reorder_buf.insert(seq);
        }

        let ack = self.rcv_next;
        self.on_ack(ack);
    }

    /// Sender side: cumulative-ack processing and duplicate-ack counting,
    /// feeding the state machine the way the connection's ack path would.
    fn on_ack(&mut self, ack: u64) {
        if ack > self.snd_una {
            let segments_acked = ((ack - self.snd_una) / SEGMENT_SIZE) as u32;

            self.snd_una = ack;
            self.dup_acks = 0;
            self.sync_in_flight();

            if self.state.congestion_state() == CongestionState::Recovery &&
                ack >= self.recovery_point
            {
                self.machine.on_full_ack(
                    &mut self.state,
                    &mut self.recovery,
                    TRACE_ID,
                );
            }

            self.machine
                .on_ack_received(&mut self.state, segments_acked, TRACE_ID);

            return;
        }

        self.dup_acks += 1;

        if self.dup_acks == 1 {
            self.machine.on_duplicate_ack(&mut self.state, TRACE_ID);
        }

        if self.dup_acks == DUP_ACK_THRESHOLD {
            self.sync_in_flight();
            self.recovery_point = self.tx_next;

            self.machine.on_loss_detected(
                &mut self.state,
                &mut self.recovery,
                TRACE_ID,
            );

            // Fast retransmit of the missing segment.
            let hole = self.snd_una;
            self.transmit(hole);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn reno_three_drops_three_recoveries() {
        init();

        // 200 segments, initial window of 10 segments, SACK disabled and
        // the minimum RTO raised so only fast retransmit is in play. The
        // three dropped segments are far enough apart for each loss to
        // resolve before the next one is sent.
        let seqs_to_kill = [7001, 7501, 8001];

        let mut transfer = TestTransfer::new(&seqs_to_kill);
        transfer.run();

        // One Disorder -> Recovery transition per dropped segment.
        assert_eq!(*transfer.recovery_transitions.borrow(), seqs_to_kill.len());
        assert_eq!(transfer.recovery.entries, seqs_to_kill.len());
        assert_eq!(transfer.recovery.exits, seqs_to_kill.len());

        // Every drop notification carries one of the configured sequence
        // numbers, each observed exactly once.
        assert_eq!(*transfer.dropped.borrow(), seqs_to_kill.to_vec());

        assert_eq!(transfer.state.congestion_state(), CongestionState::Open);
    }

    #[test]
    fn transfer_without_loss_stays_open() {
        init();

        let mut transfer = TestTransfer::new(&[]);

        let initial_cwnd = transfer.state.congestion_window();

        transfer.run();

        assert_eq!(*transfer.recovery_transitions.borrow(), 0);
        assert!(transfer.dropped.borrow().is_empty());
        assert_eq!(transfer.state.congestion_state(), CongestionState::Open);

        // Without loss the window only ever grew.
        assert!(transfer.state.congestion_window() >= initial_cwnd);
        assert_eq!(
            transfer.state.congestion_window(),
            initial_cwnd + APP_SEGMENT_COUNT as usize * SEGMENT_SIZE as usize
        );
    }

    #[test]
    fn drop_model_kills_first_transit_only() {
        init();

        let mut model = SeqErrorModel::new(&[500]);

        assert!(model.intercept(500));

        // The retransmission passes.
        assert!(!model.intercept(500));
        assert!(!model.intercept(600));
    }
}
