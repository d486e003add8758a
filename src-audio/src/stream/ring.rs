// ============================================================================
// Blocking Ring Buffer
// ============================================================================
//
// Mono sample FIFO between a cpal callback and the stream worker.
// The callback side never waits: it writes what fits (capture) or reads what
// is there and pads with silence (render). The worker side blocks with a
// timeout, which is the backpressure of the whole relay.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

struct RingState {
    buffer: Vec<f32>,
    write_pos: usize,
    read_pos: usize,
    len: usize,
}

impl RingState {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity.max(1)],
            write_pos: 0,
            read_pos: 0,
            len: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn available_write(&self) -> usize {
        self.capacity() - self.len
    }

    fn write(&mut self, samples: &[f32]) -> usize {
        let count = samples.len().min(self.available_write());
        for &sample in &samples[..count] {
            self.buffer[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % self.buffer.len();
        }
        self.len += count;
        count
    }

    fn read(&mut self, output: &mut [f32]) -> usize {
        let count = output.len().min(self.len);
        for out in &mut output[..count] {
            *out = self.buffer[self.read_pos];
            self.read_pos = (self.read_pos + 1) % self.buffer.len();
        }
        self.len -= count;
        count
    }

    fn clear(&mut self) {
        self.write_pos = 0;
        self.read_pos = 0;
        self.len = 0;
    }
}

/// FIFO with a non-blocking callback side and a blocking worker side
pub struct BlockingRing {
    state: Mutex<RingState>,
    readable: Condvar,
    writable: Condvar,
    closed: AtomicBool,
    overruns: AtomicU64,
    underruns: AtomicU64,
}

impl BlockingRing {
    pub fn new(capacity_frames: usize) -> Self {
        Self {
            state: Mutex::new(RingState::new(capacity_frames)),
            readable: Condvar::new(),
            writable: Condvar::new(),
            closed: AtomicBool::new(false),
            overruns: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity()
    }

    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Callback side: store what fits, count the rest as overrun
    pub fn push(&self, samples: &[f32]) -> usize {
        let written = self.state.lock().write(samples);
        if written < samples.len() {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
        if written > 0 {
            self.readable.notify_one();
        }
        written
    }

    /// Callback side: fill `output`, padding with silence on underrun
    pub fn pop_or_silence(&self, output: &mut [f32]) -> usize {
        let read = self.state.lock().read(output);
        if read < output.len() {
            output[read..].fill(0.0);
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
        if read > 0 {
            self.writable.notify_one();
        }
        read
    }

    /// Worker side: wait until `output` can be filled completely, the
    /// timeout expires or the ring is closed. Returns samples read.
    pub fn pop_blocking(&self, output: &mut [f32], timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        let wanted = output.len().min(state.capacity());
        while state.len < wanted && !self.is_closed() {
            if self.readable.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        let read = state.read(output);
        drop(state);
        if read > 0 {
            self.writable.notify_one();
        }
        read
    }

    /// Worker side: write all samples, waiting for room until the timeout
    /// expires or the ring is closed. Returns samples written.
    pub fn push_blocking(&self, samples: &[f32], timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut written = 0;
        let mut state = self.state.lock();
        while written < samples.len() && !self.is_closed() {
            let n = state.write(&samples[written..]);
            written += n;
            if n > 0 {
                self.readable.notify_one();
            }
            if written == samples.len() {
                break;
            }
            if self.writable.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        written
    }

    /// Wake every waiter and make further blocking calls return at once
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _guard = self.state.lock();
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Re-open after close (source/sink restart)
    pub fn reopen(&self) {
        self.state.lock().clear();
        self.closed.store(false, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.state.lock().clear();
        self.writable.notify_all();
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_push_pop_order() {
        let ring = BlockingRing::new(8);
        assert_eq!(ring.push(&[1.0, 2.0, 3.0]), 3);
        let mut out = [0.0; 2];
        assert_eq!(ring.pop_blocking(&mut out, Duration::from_millis(10)), 2);
        assert_eq!(out, [1.0, 2.0]);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_overrun_drops_excess() {
        let ring = BlockingRing::new(4);
        assert_eq!(ring.push(&[1.0; 6]), 4);
        assert_eq!(ring.overruns(), 1);
    }

    #[test]
    fn test_underrun_pads_silence() {
        let ring = BlockingRing::new(8);
        ring.push(&[0.5, 0.5]);
        let mut out = [9.0; 4];
        assert_eq!(ring.pop_or_silence(&mut out), 2);
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0]);
        assert_eq!(ring.underruns(), 1);
    }

    #[test]
    fn test_pop_blocking_times_out_short() {
        let ring = BlockingRing::new(8);
        ring.push(&[1.0]);
        let mut out = [0.0; 4];
        let start = Instant::now();
        assert_eq!(ring.pop_blocking(&mut out, Duration::from_millis(20)), 1);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_close_wakes_blocked_reader() {
        let ring = Arc::new(BlockingRing::new(8));
        let reader = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut out = [0.0; 4];
                ring.pop_blocking(&mut out, Duration::from_secs(10))
            })
        };
        thread::sleep(Duration::from_millis(20));
        ring.close();
        assert_eq!(reader.join().unwrap(), 0);
    }

    #[test]
    fn test_push_blocking_waits_for_room() {
        let ring = Arc::new(BlockingRing::new(4));
        ring.push(&[0.0; 4]);
        let drainer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                let mut out = [0.0; 4];
                ring.pop_or_silence(&mut out);
            })
        };
        assert_eq!(ring.push_blocking(&[1.0; 4], Duration::from_secs(2)), 4);
        drainer.join().unwrap();
    }
}
