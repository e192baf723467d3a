// SPDX-License-Identifier: LGPL-3.0-or-later
// Copyright (c) 2023 Takashi Sakamoto

//! Transaction implementation for Fireworks protocol.
//!
//! The module includes [`EfwTransaction`] to perform transaction defined by Echo Audio Digital
//! Corporation for Fireworks board module. The command frame is transferred to the unit by
//! asynchronous block write transaction, then the unit transfers the response frame to the
//! address region reserved in 1394 OHCI controller. The response frame arrives in the thread
//! which dispatches events of the node, thus the caller thread sleeps on a per-transaction
//! condition variable until the response with the corresponding sequence number is delivered
//! or the given timeout expires.

use {
    super::{frame::*, *},
    glib::FileError,
    hinawa::{prelude::*, FwNode, FwRcode, FwReq, FwResp, FwTcode},
    std::{
        collections::BTreeMap,
        sync::{Arc, Condvar, Mutex, Weak},
        time::{Duration, Instant},
    },
    tracing::{debug, trace},
};

/// The address to which the command frame is transferred.
pub const COMMAND_OFFSET: u64 = 0xecc000000000;

/// The address region in 1394 OHCI controller to which the unit transfers the response frame.
pub const RESPONSE_OFFSET: u64 = 0xecc080000000;

// The sequence number of command frame takes even values in the range, and the unit uses the
// next odd value in the response frame. Higher values are left to ALSA Fireworks driver.
const SEQNUM_MAX: u32 = u16::MAX as u32;

// The timeout to transfer one command frame.
const TRANSMIT_TIMEOUT_MS: u32 = 100;

// The status field of a waiter keeps the value until the response frame is delivered. It is
// out of the range of any status the unit can declare.
const STATUS_UNSET: u32 = u32::MAX;

struct WaiterCell {
    status: u32,
    params: Vec<u32>,
    count: usize,
}

struct Waiter {
    resp_seqnum: u32,
    category: u32,
    command: u32,
    cell: Mutex<WaiterCell>,
    cond: Condvar,
}

impl Waiter {
    fn new(resp_seqnum: u32, category: u32, command: u32, capacity: usize) -> Self {
        Self {
            resp_seqnum,
            category,
            command,
            cell: Mutex::new(WaiterCell {
                status: STATUS_UNSET,
                params: vec![0; capacity],
                count: 0,
            }),
            cond: Condvar::new(),
        }
    }

    fn wait_until(&self, deadline: Instant, params: &mut Vec<u32>) -> Result<(), Error> {
        let mut cell = self.cell.lock().unwrap();

        while cell.status == STATUS_UNSET {
            let now = Instant::now();
            if now >= deadline {
                let msg = format!(
                    "No response for seqnum {} in category {}, command {}",
                    self.resp_seqnum, self.category, self.command
                );
                Err(Error::new(EfwProtocolError::Timeout, &msg))?;
            }
            let (guard, _) = self.cond.wait_timeout(cell, deadline - now).unwrap();
            cell = guard;
        }

        let msg = format!(
            "Response for seqnum {} in category {}, command {}",
            self.resp_seqnum, self.category, self.command
        );
        status_to_error(cell.status, &msg)?;

        if cell.count > params.len() {
            let msg = format!(
                "Response has {} parameters while the caller prepared for {}",
                cell.count,
                params.len()
            );
            Err(Error::new(EfwProtocolError::LargeResp, &msg))?;
        }

        params.truncate(cell.count);
        params.copy_from_slice(&cell.params[..cell.count]);

        Ok(())
    }
}

#[derive(Default)]
struct CorrelatorState {
    next_seqnum: u32,
    waiters: BTreeMap<u32, Weak<Waiter>>,
}

/// The state shared between caller threads and the thread which dispatches events of the node.
#[derive(Default)]
struct Correlator {
    state: Mutex<CorrelatorState>,
}

impl Correlator {
    // Allocate the pair of sequence numbers and subscribe a waiter for the response, under the
    // same lock so that concurrent transactions never overlap.
    fn begin(&self, category: u32, command: u32, capacity: usize) -> (u32, Arc<Waiter>) {
        let mut state = self.state.lock().unwrap();

        let req_seqnum = state.next_seqnum;
        let resp_seqnum = req_seqnum + 1;
        state.next_seqnum += 2;
        if state.next_seqnum > SEQNUM_MAX {
            state.next_seqnum = 0;
        }

        let waiter = Arc::new(Waiter::new(resp_seqnum, category, command, capacity));
        state.waiters.insert(resp_seqnum, Arc::downgrade(&waiter));

        (req_seqnum, waiter)
    }

    fn end(&self, waiter: &Arc<Waiter>) {
        let mut state = self.state.lock().unwrap();
        state.waiters.remove(&waiter.resp_seqnum);
    }

    // Called in the thread which dispatches events of the node. The buffer can convey several
    // response frames in a row.
    fn deliver(&self, mut raw: &[u8]) {
        while raw.len() >= HEADER_QUADLET_COUNT * QUADLET_SIZE {
            let mut frame = TransactionFrame::default();
            match deserialize_frame(&mut frame, raw) {
                Ok(consumed) => {
                    self.dispatch_frame(&frame);
                    raw = &raw[consumed..];
                }
                Err(e) => {
                    debug!(%e, "malformed response frame");
                    break;
                }
            }
        }
    }

    fn dispatch_frame(&self, frame: &TransactionFrame) {
        let waiter = {
            let state = self.state.lock().unwrap();
            state.waiters.get(&frame.seqnum).and_then(Weak::upgrade)
        };

        if let Some(w) = waiter {
            let mut cell = w.cell.lock().unwrap();
            if frame.category != w.category || frame.command != w.command {
                cell.status = EfwProtocolError::Bad.code() as u32;
            } else {
                let count = frame.params.len();
                let filled = count.min(cell.params.len());
                cell.params[..filled].copy_from_slice(&frame.params[..filled]);
                cell.count = count;
                cell.status = if frame.status <= STATUS_MAX {
                    frame.status
                } else {
                    EfwProtocolError::Bad.code() as u32
                };
            }
            debug!(
                seqnum = frame.seqnum,
                category = frame.category,
                command = frame.command,
                status = frame.status,
                count = frame.params.len(),
                "response"
            );
            w.cond.notify_one();
        } else {
            trace!(seqnum = frame.seqnum, "response for no transaction on-going");
        }
    }
}

/// The implementation of transaction for Fireworks board module. It should be bound to the
/// node of the unit before any operation, and the source of the node should be dispatched in
/// another thread so that the caller thread can block for the response.
#[derive(Default)]
pub struct EfwTransaction {
    resp: FwResp,
    node: Option<FwNode>,
    correlator: Arc<Correlator>,
}

impl EfwTransaction {
    pub fn new() -> Self {
        Default::default()
    }

    /// Reserve the address region for response frames and listen to it for communication to
    /// the given node.
    pub fn bind(&mut self, node: &FwNode) -> Result<(), Error> {
        self.resp.reserve_within_region(
            node,
            RESPONSE_OFFSET,
            RESPONSE_OFFSET + (MAX_FRAME_SIZE as u64),
            MAX_FRAME_SIZE as u32,
        )?;

        let correlator = Arc::clone(&self.correlator);
        let node_id = node.node_id();
        self.resp.connect_requested(
            move |resp, tcode, offset, src, _dst, _card, _generation, _tstamp, frame| {
                if tcode != FwTcode::WriteBlockRequest {
                    FwRcode::TypeError
                } else if src != node_id || offset != RESPONSE_OFFSET {
                    FwRcode::AddressError
                } else if !resp.is_reserved() || frame.len() < HEADER_QUADLET_COUNT * QUADLET_SIZE
                {
                    FwRcode::DataError
                } else {
                    correlator.deliver(frame);
                    FwRcode::Complete
                }
            },
        );

        self.node = Some(node.clone());

        Ok(())
    }

    /// Release the address region.
    pub fn unbind(&mut self) {
        self.resp.release();
        self.node = None;
    }
}

impl EfwProtocol for EfwTransaction {
    fn transaction(
        &mut self,
        category: u32,
        command: u32,
        args: &[u32],
        params: &mut Vec<u32>,
        timeout_ms: u32,
    ) -> Result<(), Error> {
        let node = self
            .node
            .as_ref()
            .ok_or_else(|| Error::new(FileError::Nxio, "Not bound to any node"))?;

        let (req_seqnum, waiter) = self.correlator.begin(category, command, params.len());

        let frame = TransactionFrame {
            version: FRAME_VERSION,
            seqnum: req_seqnum,
            category,
            command,
            status: 0,
            params: args.to_vec(),
        };

        let result = serialize_frame(&frame).and_then(|mut raw| {
            debug!(seqnum = req_seqnum, category, command, args = args.len(), "command");
            // The deadline covers the write transaction itself as well.
            let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
            let req = FwReq::new();
            let len = raw.len();
            req.transaction(
                node,
                FwTcode::WriteBlockRequest,
                COMMAND_OFFSET,
                len,
                &mut raw,
                TRANSMIT_TIMEOUT_MS,
            )?;
            waiter.wait_until(deadline, params)
        });

        self.correlator.end(&waiter);

        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;

    fn response_frame(seqnum: u32, category: u32, command: u32, status: u32, params: &[u32]) -> Vec<u8> {
        let frame = TransactionFrame {
            version: FRAME_VERSION,
            seqnum,
            category,
            command,
            status,
            params: params.to_vec(),
        };
        serialize_frame(&frame).unwrap()
    }

    #[test]
    fn seqnum_pairs_are_even_and_monotonic() {
        let correlator = Correlator::default();

        (0..8).for_each(|i| {
            let (req_seqnum, waiter) = correlator.begin(0, 0, 0);
            assert_eq!(req_seqnum, 2 * i);
            assert_eq!(req_seqnum % 2, 0);
            assert_eq!(waiter.resp_seqnum, req_seqnum + 1);
            correlator.end(&waiter);
        });
    }

    #[test]
    fn seqnum_wraps_after_ceiling() {
        let correlator = Correlator::default();
        correlator.state.lock().unwrap().next_seqnum = SEQNUM_MAX - 1;

        let (req_seqnum, waiter) = correlator.begin(0, 0, 0);
        assert_eq!(req_seqnum, SEQNUM_MAX - 1);
        assert_eq!(waiter.resp_seqnum, SEQNUM_MAX);
        correlator.end(&waiter);

        let (req_seqnum, waiter) = correlator.begin(0, 0, 0);
        assert_eq!(req_seqnum, 0);
        assert_eq!(waiter.resp_seqnum, 1);
        correlator.end(&waiter);
    }

    #[test]
    fn response_delivers_parameters() {
        let correlator = Arc::new(Correlator::default());

        let (_, waiter) = correlator.begin(1, 1, 4);

        let c = Arc::clone(&correlator);
        let seqnum = waiter.resp_seqnum;
        let th = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            c.deliver(&response_frame(seqnum, 1, 1, 0, &[0xdead, 0xbeef]));
        });

        let mut params = vec![0; 4];
        let deadline = Instant::now() + Duration::from_millis(200);
        waiter.wait_until(deadline, &mut params).unwrap();
        assert_eq!(&params, &[0xdead, 0xbeef]);

        correlator.end(&waiter);
        th.join().unwrap();
    }

    #[test]
    fn unrelated_seqnum_never_wakes_waiter() {
        let correlator = Arc::new(Correlator::default());

        let (_, waiter) = correlator.begin(1, 2, 2);

        let c = Arc::clone(&correlator);
        let seqnum = waiter.resp_seqnum;
        let th = thread::spawn(move || {
            c.deliver(&response_frame(seqnum + 2, 1, 2, 0, &[0x11]));
            c.deliver(&response_frame(seqnum.wrapping_sub(2), 1, 2, 0, &[0x22]));
        });
        th.join().unwrap();

        let mut params = vec![0; 2];
        let deadline = Instant::now() + Duration::from_millis(20);
        let err = waiter.wait_until(deadline, &mut params).unwrap_err();
        assert_eq!(err.kind::<EfwProtocolError>(), Some(EfwProtocolError::Timeout));

        correlator.end(&waiter);
    }

    #[test]
    fn timeout_expires_in_window() {
        let correlator = Correlator::default();
        let (_, waiter) = correlator.begin(0, 0, 0);

        let mut params = Vec::new();
        let begin = Instant::now();
        let deadline = begin + Duration::from_millis(10);
        let err = waiter.wait_until(deadline, &mut params).unwrap_err();
        let elapsed = begin.elapsed();

        assert_eq!(err.kind::<EfwProtocolError>(), Some(EfwProtocolError::Timeout));
        assert!(elapsed >= Duration::from_millis(10));
        assert!(elapsed < Duration::from_millis(50));

        correlator.end(&waiter);
    }

    #[test]
    fn mismatched_command_wakes_with_generic_failure() {
        let correlator = Arc::new(Correlator::default());
        let (_, waiter) = correlator.begin(1, 3, 2);

        let c = Arc::clone(&correlator);
        let seqnum = waiter.resp_seqnum;
        let th = thread::spawn(move || {
            c.deliver(&response_frame(seqnum, 1, 4, 0, &[]));
        });

        let mut params = vec![0; 2];
        let deadline = Instant::now() + Duration::from_millis(200);
        let err = waiter.wait_until(deadline, &mut params).unwrap_err();
        assert_eq!(err.kind::<EfwProtocolError>(), Some(EfwProtocolError::Bad));

        correlator.end(&waiter);
        th.join().unwrap();
    }

    #[test]
    fn oversized_response_is_detected() {
        let correlator = Arc::new(Correlator::default());
        let (_, waiter) = correlator.begin(1, 1, 1);

        correlator.deliver(&response_frame(waiter.resp_seqnum, 1, 1, 0, &[1, 2, 3]));

        let mut params = vec![0; 1];
        let deadline = Instant::now() + Duration::from_millis(200);
        let err = waiter.wait_until(deadline, &mut params).unwrap_err();
        assert_eq!(err.kind::<EfwProtocolError>(), Some(EfwProtocolError::LargeResp));

        correlator.end(&waiter);
    }

    #[test]
    fn unknown_status_folds_to_generic_failure() {
        let correlator = Arc::new(Correlator::default());
        let (_, waiter) = correlator.begin(1, 1, 0);

        correlator.deliver(&response_frame(waiter.resp_seqnum, 1, 1, 0x20, &[]));

        let mut params = Vec::new();
        let deadline = Instant::now() + Duration::from_millis(200);
        let err = waiter.wait_until(deadline, &mut params).unwrap_err();
        assert_eq!(err.kind::<EfwProtocolError>(), Some(EfwProtocolError::Bad));

        correlator.end(&waiter);
    }

    #[test]
    fn batched_responses_wake_both_waiters() {
        let correlator = Arc::new(Correlator::default());

        let (_, first) = correlator.begin(1, 1, 1);
        let (_, second) = correlator.begin(1, 1, 1);

        let mut raw = response_frame(first.resp_seqnum, 1, 1, 0, &[10]);
        raw.extend_from_slice(&response_frame(second.resp_seqnum, 1, 1, 0, &[20]));
        correlator.deliver(&raw);

        let deadline = Instant::now() + Duration::from_millis(200);

        let mut params = vec![0; 1];
        first.wait_until(deadline, &mut params).unwrap();
        assert_eq!(&params, &[10]);

        let mut params = vec![0; 1];
        second.wait_until(deadline, &mut params).unwrap();
        assert_eq!(&params, &[20]);

        correlator.end(&first);
        correlator.end(&second);
    }

    #[test]
    fn abandoned_waiter_drops_late_response() {
        let correlator = Arc::new(Correlator::default());

        let (_, waiter) = correlator.begin(1, 1, 1);
        let seqnum = waiter.resp_seqnum;
        correlator.end(&waiter);
        drop(waiter);

        // Nothing to signal; the delivery is a no-op.
        correlator.deliver(&response_frame(seqnum, 1, 1, 0, &[1]));
        assert!(correlator.state.lock().unwrap().waiters.is_empty());
    }
}
