// Window-based congestion control loosely modeled on TCP Reno. The window is counted in
// packets rather than bytes, and is never allowed past what the peer advertised.

const INITIAL_CWND: u32 = 2;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Mode {
    SlowStart,
    CongestionAvoidance,
}

pub struct CongestionControl {
    mode: Mode,
    cwnd: u32,
    cwnd_max: u32,
    ssthresh: u32,
}

impl CongestionControl {
    pub fn new(peer_window: u32, ssthresh: u32) -> Self {
        // A peer advertising no window at all may still receive one packet at a time
        let cwnd_max = peer_window.max(1);

        Self {
            mode: Mode::SlowStart,
            cwnd: INITIAL_CWND.min(cwnd_max),
            cwnd_max,
            ssthresh,
        }
    }

    pub fn handle_ack(&mut self) {
        match self.mode {
            Mode::SlowStart => {
                // Multiplicative increase until the threshold is crossed
                self.cwnd = self.cwnd.saturating_mul(2);

                if self.cwnd > self.ssthresh {
                    self.mode = Mode::CongestionAvoidance;
                }
            }
            Mode::CongestionAvoidance => {
                self.cwnd = self.cwnd.saturating_add(1);
            }
        }

        self.cwnd = self.cwnd.min(self.cwnd_max);
    }

    pub fn handle_drop(&mut self) {
        self.cwnd = (self.cwnd / 2).max(1);
        self.mode = Mode::CongestionAvoidance;
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn in_slow_start(&self) -> bool {
        self.mode == Mode::SlowStart
    }
}
