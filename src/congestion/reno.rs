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

//! Reno congestion control.
//!
//! Window growth follows the classic two-regime scheme: exponential growth
//! below the slow-start threshold, one segment per window's worth of
//! acknowledgments above it. The fractional accumulator lives in
//! [`ConnectionState::cwnd_cnt`] so the algorithm itself stays stateless.

use std::cmp;

use crate::congestion::CongestionControl;
use crate::congestion::ConnectionState;
use crate::congestion::MINIMUM_WINDOW_SEGMENTS;

/// Reno congestion control implementation.
#[derive(Clone, Debug, Default)]
pub struct Reno;

impl Reno {
    /// Grows the window by one segment per acknowledged segment, landing
    /// exactly on `ssthresh` if the growth would overshoot it.
    ///
    /// Returns the number of acknowledged segments not consumed here; the
    /// caller credits them to congestion avoidance within the same event.
    fn slow_start(
        &self, state: &mut ConnectionState, segments_acked: u32,
    ) -> u32 {
        if segments_acked == 0 {
            return 0;
        }

        let cwnd = state.congestion_window();

        let next = cmp::min(
            cwnd + segments_acked as usize * state.segment_size(),
            state.ssthresh(),
        );

        state.set_congestion_window(next);

        let used = ((next - cwnd) / state.segment_size()) as u32;

        trace!(
            "reno slow start cwnd={} acked={} used={}",
            next,
            segments_acked,
            used
        );

        segments_acked - used
    }

    /// Additive increase: one segment of growth per window's worth of
    /// acknowledged segments, tracked through the fractional accumulator.
    fn congestion_avoidance(
        &self, state: &mut ConnectionState, segments_acked: u32,
    ) {
        for _ in 0..segments_acked {
            // Minimum divisor of one keeps the accumulator moving even if
            // the window has collapsed below a single segment's worth.
            let w = cmp::max(
                state.congestion_window() / state.segment_size(),
                1,
            ) as u32;

            let cnt = state.cwnd_cnt() + 1;

            if cnt >= w {
                state.set_cwnd_cnt(0);
                state.set_congestion_window(
                    state.congestion_window() + state.segment_size(),
                );

                trace!(
                    "reno congestion avoidance cwnd={}",
                    state.congestion_window()
                );
            } else {
                state.set_cwnd_cnt(cnt);
            }
        }
    }
}

impl CongestionControl for Reno {
    fn name(&self) -> &'static str {
        "reno"
    }

    fn increase_window(
        &mut self, state: &mut ConnectionState, mut segments_acked: u32,
    ) {
        if state.congestion_window() < state.ssthresh() {
            segments_acked = self.slow_start(state, segments_acked);
        }

        // A single acknowledgment event can finish slow start and continue
        // into congestion avoidance with the unconsumed segments.
        if state.congestion_window() >= state.ssthresh() {
            self.congestion_avoidance(state, segments_acked);
        }
    }

    fn slow_start_threshold(
        &self, state: &ConnectionState, bytes_in_flight: usize,
    ) -> usize {
        cmp::max(
            bytes_in_flight / 2,
            MINIMUM_WINDOW_SEGMENTS * state.segment_size(),
        )
    }

    fn fork(&self) -> Box<dyn CongestionControl> {
        Box::new(self.clone())
    }
}
