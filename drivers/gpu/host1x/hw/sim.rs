// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Software model of the host1x hardware
//!
//! `SimHost1x` keeps the syncpoint registers and per-channel command FIFOs in memory and
//! executes kicked push buffer words when asked to, one command at a time and strictly in order.
//! Syncpoint waits stall their channel until the syncpoint reaches the loaded payload, syncpoint
//! increments raise the threshold interrupt once the programmed threshold is reached. Gathers are
//! not fetched; they are recorded so that callers can inspect what the engine would have read.
//!
//! The interrupt handler is always called with no internal lock held, so it may call back into
//! the model.

use super::opcodes::*;
use super::{Host1xHw, HwConfig, IrqHandler};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// A gather executed by a simulated channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SimGather {
    /// Class the channel was in when the gather executed.
    pub class: u32,
    /// Device address of the gather.
    pub address: u64,
    /// Number of words in the gather.
    pub words: u32,
}

#[derive(Default)]
struct SimChannel {
    initialized: bool,
    running: bool,
    fifo: VecDeque<u32>,
    class: u32,
    payload: u32,
    gathers: Vec<SimGather>,
}

struct SimState {
    syncpts: Vec<u32>,
    thresholds: Vec<Option<u32>>,
    channels: Vec<SimChannel>,
}

#[derive(Debug, PartialEq, Eq)]
enum Step {
    Progress,
    Stalled,
    Idle,
}

/// In-memory host1x model.
pub struct SimHost1x {
    config: &'static HwConfig,
    state: Mutex<SimState>,
    irq: Mutex<Option<IrqHandler>>,
}

fn expired(value: u32, threshold: u32) -> bool {
    value.wrapping_sub(threshold) as i32 >= 0
}

impl SimHost1x {
    /// Creates a model of the given host1x revision with every syncpoint at zero.
    pub fn new(config: &'static HwConfig) -> Arc<SimHost1x> {
        Arc::new(SimHost1x {
            config,
            state: Mutex::new(SimState {
                syncpts: vec![0; config.nb_pts as usize],
                thresholds: vec![None; config.nb_pts as usize],
                channels: (0..config.nb_channels).map(|_| Default::default()).collect(),
            }),
            irq: Mutex::new(None),
        })
    }

    fn fire(&self, fired: &[u32]) {
        if fired.is_empty() {
            return;
        }

        let handler = self.irq.lock().clone();
        if let Some(handler) = handler {
            for &id in fired {
                handler(id);
            }
        }
    }

    fn incr_locked(&self, state: &mut SimState, id: u32, fired: &mut Vec<u32>) {
        let Some(value) = state.syncpts.get_mut(id as usize) else {
            log::warn!("host1x-sim: increment of invalid syncpoint {}", id);
            return;
        };
        *value = value.wrapping_add(1);

        let value = *value;
        let threshold = &mut state.thresholds[id as usize];
        if let Some(t) = *threshold {
            if expired(value, t) {
                *threshold = None;
                fired.push(id);
            }
        }
    }

    fn step_locked(&self, state: &mut SimState, id: usize, fired: &mut Vec<u32>) -> Step {
        let index_mask = (1u32 << self.config.syncpt_index_bits) - 1;
        let ch = &mut state.channels[id];

        if !ch.running {
            return Step::Idle;
        }
        let Some(&word) = ch.fifo.front() else {
            return Step::Idle;
        };

        let mut incrs: Vec<u32> = Vec::new();

        match opcode(word) {
            OPCODE_SETCLASS => {
                let mask = word & 0x3f;
                let count = mask.count_ones() as usize;
                if ch.fifo.len() < 1 + count {
                    return Step::Idle;
                }

                let class = class_id(word);
                let regs = (0..6u32)
                    .filter(|bit| mask & (1 << bit) != 0)
                    .map(|bit| offset(word) + bit);
                let writes: Vec<(u32, u32)> = regs.zip(ch.fifo.iter().skip(1).copied()).collect();

                // A wait that is not satisfied yet leaves the command in the FIFO.
                let mut payload = ch.payload;
                for &(reg, value) in &writes {
                    if class == CLASS_HOST1X && reg == UCLASS_LOAD_SYNCPT_PAYLOAD_32 {
                        payload = value;
                    } else if class == CLASS_HOST1X && reg == UCLASS_WAIT_SYNCPT_32 {
                        let current = state.syncpts.get((value & index_mask) as usize);
                        if !current.is_some_and(|&v| expired(v, payload)) {
                            return Step::Stalled;
                        }
                    }
                }

                ch.class = class;
                ch.payload = payload;
                for &(reg, value) in &writes {
                    if reg == UCLASS_INCR_SYNCPT {
                        incrs.push(value & index_mask);
                    }
                }
                ch.fifo.drain(..1 + count);
            }
            op @ (OPCODE_INCR | OPCODE_NONINCR) => {
                let count = (word & 0xffff) as usize;
                if ch.fifo.len() < 1 + count {
                    return Step::Idle;
                }

                for (i, &value) in ch.fifo.iter().skip(1).take(count).enumerate() {
                    let reg = if op == OPCODE_INCR {
                        offset(word) + i as u32
                    } else {
                        offset(word)
                    };
                    if reg == UCLASS_INCR_SYNCPT {
                        incrs.push(value & index_mask);
                    } else if ch.class == CLASS_HOST1X && reg == UCLASS_LOAD_SYNCPT_PAYLOAD_32 {
                        ch.payload = value;
                    }
                }
                ch.fifo.drain(..1 + count);
            }
            OPCODE_IMM => {
                if offset(word) == UCLASS_INCR_SYNCPT {
                    incrs.push(word & index_mask);
                }
                ch.fifo.pop_front();
            }
            OPCODE_GATHER => {
                if ch.fifo.len() < 2 {
                    return Step::Idle;
                }
                let gather = SimGather {
                    class: ch.class,
                    address: ch.fifo[1] as u64,
                    words: word & GATHER_MAX_WORDS,
                };
                ch.gathers.push(gather);
                ch.fifo.drain(..2);
            }
            op => {
                log::warn!("host1x-sim: channel {}: unhandled opcode {:#x}", id, op);
                ch.fifo.pop_front();
            }
        }

        for sp in incrs {
            self.incr_locked(state, sp, fired);
        }

        Step::Progress
    }

    /// Executes the next command of channel `id`. Returns `false` if the channel is idle,
    /// stopped or stalled on a wait.
    pub fn step_channel(&self, id: u32) -> bool {
        let mut fired = Vec::new();
        let step = {
            let mut state = self.state.lock();
            if id as usize >= state.channels.len() {
                return false;
            }
            self.step_locked(&mut state, id as usize, &mut fired)
        };
        self.fire(&fired);
        step == Step::Progress
    }

    /// Executes commands of channel `id` until it idles or stalls. Returns the number of
    /// commands executed.
    pub fn run_channel(&self, id: u32) -> usize {
        let mut count = 0;
        while self.step_channel(id) {
            count += 1;
        }
        count
    }

    /// Executes all channels until none of them can make progress. Returns the number of
    /// commands executed.
    pub fn run_all(&self) -> usize {
        let mut total = 0;
        loop {
            let progress: usize = (0..self.config.nb_channels)
                .map(|id| self.run_channel(id))
                .sum();
            if progress == 0 {
                return total;
            }
            total += progress;
        }
    }

    /// Returns the number of words waiting in the FIFO of channel `id`.
    pub fn pending_words(&self, id: u32) -> usize {
        self.state
            .lock()
            .channels
            .get(id as usize)
            .map_or(0, |ch| ch.fifo.len())
    }

    /// Returns whether command DMA is running on channel `id`.
    pub fn is_running(&self, id: u32) -> bool {
        self.state
            .lock()
            .channels
            .get(id as usize)
            .is_some_and(|ch| ch.running)
    }

    /// Returns the gathers executed by channel `id` since it was initialized.
    pub fn gathers(&self, id: u32) -> Vec<SimGather> {
        self.state
            .lock()
            .channels
            .get(id as usize)
            .map_or_else(Vec::new, |ch| ch.gathers.clone())
    }

    /// Overwrites the register value of syncpoint `id`, as firmware or a previous owner of the
    /// hardware might have left it.
    pub fn write_syncpt(&self, id: u32, value: u32) {
        if let Some(v) = self.state.lock().syncpts.get_mut(id as usize) {
            *v = value;
        }
    }

    /// Returns whether the threshold interrupt of syncpoint `id` is armed.
    pub fn threshold_armed(&self, id: u32) -> Option<u32> {
        self.state
            .lock()
            .thresholds
            .get(id as usize)
            .copied()
            .flatten()
    }
}

impl Host1xHw for SimHost1x {
    fn config(&self) -> &'static HwConfig {
        self.config
    }

    fn channel_init(&self, id: u32) -> Result {
        let mut state = self.state.lock();
        let ch = state.channels.get_mut(id as usize).ok_or(Error::Invalid)?;
        *ch = SimChannel {
            initialized: true,
            ..Default::default()
        };
        Ok(())
    }

    fn cdma_start(&self, id: u32) {
        if let Some(ch) = self.state.lock().channels.get_mut(id as usize) {
            if !ch.initialized {
                log::warn!("host1x-sim: starting uninitialized channel {}", id);
            }
            ch.running = true;
        }
    }

    fn cdma_stop(&self, id: u32) {
        if let Some(ch) = self.state.lock().channels.get_mut(id as usize) {
            ch.running = false;
            ch.fifo.clear();
        }
    }

    fn cdma_kick(&self, id: u32, words: &[u32]) {
        if let Some(ch) = self.state.lock().channels.get_mut(id as usize) {
            ch.fifo.extend(words.iter().copied());
        }
    }

    fn syncpt_load(&self, id: u32) -> u32 {
        self.state
            .lock()
            .syncpts
            .get(id as usize)
            .copied()
            .unwrap_or(0)
    }

    fn syncpt_cpu_incr(&self, id: u32) {
        let mut fired = Vec::new();
        {
            let mut state = self.state.lock();
            self.incr_locked(&mut state, id, &mut fired);
        }
        self.fire(&fired);
    }

    fn intr_set_syncpt_threshold(&self, id: u32, threshold: u32) {
        // Unlike the hardware, a threshold that is already reached does not fire here. The
        // interrupt layer re-checks the value after programming a threshold.
        if let Some(t) = self.state.lock().thresholds.get_mut(id as usize) {
            *t = Some(threshold);
        }
    }

    fn intr_disable_syncpt(&self, id: u32) {
        if let Some(t) = self.state.lock().thresholds.get_mut(id as usize) {
            *t = None;
        }
    }

    fn set_syncpt_irq_handler(&self, handler: IrqHandler) {
        *self.irq.lock() = Some(handler);
    }
}
