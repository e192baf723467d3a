// SPDX-License-Identifier: LGPL-3.0-or-later
// Copyright (c) 2023 Takashi Sakamoto

//! Protocol about operations for on-board flash memory.
//!
//! The module includes protocol about operations for on-board flash memory defined by Echo
//! Audio Digital Corporation for Fireworks board module. The flash memory consists of blocks
//! with 0x2000 bytes below offset 0x10000 and with 0x10000 bytes below offset 0x200000. One
//! transaction can convey 64 quadlets at most, therefore helper operations split longer
//! contents and wait for the flash controller between chunks.

use {
    super::*,
    glib::FileError,
    std::time::Duration,
    tracing::debug,
};

const CATEGORY_FLASH: u32 = 1;

const CMD_ERASE: u32 = 0;
const CMD_READ: u32 = 1;
const CMD_WRITE: u32 = 2;
const CMD_STATE: u32 = 3;
const CMD_SESSION_BASE: u32 = 4;
const CMD_LOCK: u32 = 5;

/// The maximum number of quadlets for content of flash memory in one transaction.
pub const FLASH_FRAME_MAX_QUADS: usize = 64;

// Size of block, below offset 0x10000.
const BLOCK_SIZE_LOW: u32 = 0x00002000;
// Size of block, between offset 0x10000 and 0x200000.
const BLOCK_SIZE_HIGH: u32 = 0x00010000;

// The upper boundary of flash memory.
const FLASH_END_OFFSET: u32 = 0x00200000;

// The flash controller is polled in the cadence while it is busy. Erasing a large block can
// take seconds, thus the polling has no upper bound.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Retrieve the size of block to which the offset in flash memory belongs. Offsets at and
/// beyond 0x200000 address no block.
pub fn flash_block_size(offset: u32) -> Result<u32, Error> {
    if offset < 0x00010000 {
        Ok(BLOCK_SIZE_LOW)
    } else if offset < FLASH_END_OFFSET {
        Ok(BLOCK_SIZE_HIGH)
    } else {
        let msg = format!("Offset {:08x} is out of flash memory", offset);
        Err(Error::new(FileError::Nxio, &msg))
    }
}

/// The state of flash controller.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FlashState {
    /// Ready for any operation.
    Ready,
    /// Busy against erase or write operation.
    Busy,
}

/// Protocol about operations for on-board flash memory for Fireworks board module.
pub trait FlashProtocol: EfwProtocol {
    /// Erase the block to which the offset belongs. The offset should be aligned to the size
    /// of block.
    fn flash_erase(&mut self, offset: u32, timeout_ms: u32) -> Result<(), Error> {
        let block_size = flash_block_size(offset)?;
        if offset % block_size > 0 {
            let msg = format!(
                "Offset {:08x} is not aligned to block with {:x} bytes",
                offset, block_size
            );
            Err(Error::new(FileError::Inval, &msg))?;
        }

        let args = [offset];
        let mut params = vec![0; 1];
        self.transaction(CATEGORY_FLASH, CMD_ERASE, &args, &mut params, timeout_ms)
    }

    /// Read the given number of quadlets from the offset in flash memory.
    fn flash_read(&mut self, offset: u32, data: &mut [u32], timeout_ms: u32) -> Result<(), Error> {
        if data.len() > FLASH_FRAME_MAX_QUADS {
            let msg = format!("{} quadlets exceed one transaction", data.len());
            Err(Error::new(FileError::Inval, &msg))?;
        }

        let count = data.len();
        let args = [offset, count as u32];
        let mut params = vec![0; 2 + FLASH_FRAME_MAX_QUADS];

        self.transaction(CATEGORY_FLASH, CMD_READ, &args, &mut params, timeout_ms)?;

        if params.len() < 2 + count || params[0] != offset || params[1] != count as u32 {
            let msg = format!(
                "Unit echoed offset {:08x} and count {} against offset {:08x} and count {}",
                params.get(0).copied().unwrap_or(0),
                params.get(1).copied().unwrap_or(0),
                offset,
                count
            );
            Err(Error::new(FileError::Io, &msg))?;
        }

        data.copy_from_slice(&params[2..(2 + count)]);

        Ok(())
    }

    /// Write the given quadlets to the offset in flash memory.
    fn flash_write(&mut self, offset: u32, data: &[u32], timeout_ms: u32) -> Result<(), Error> {
        if data.len() > FLASH_FRAME_MAX_QUADS {
            let msg = format!("{} quadlets exceed one transaction", data.len());
            Err(Error::new(FileError::Inval, &msg))?;
        }

        let mut args = vec![0; 2 + data.len()];
        args[0] = offset;
        args[1] = data.len() as u32;
        args[2..].copy_from_slice(data);

        let mut params = vec![0; 2];
        self.transaction(CATEGORY_FLASH, CMD_WRITE, &args, &mut params, timeout_ms)
    }

    /// Retrieve the state of flash controller. The unit answers the busy state as an error
    /// status, folded here into [`FlashState::Busy`].
    fn flash_state(&mut self, timeout_ms: u32) -> Result<FlashState, Error> {
        let mut params = Vec::new();
        self.transaction(CATEGORY_FLASH, CMD_STATE, &[], &mut params, timeout_ms)
            .map(|_| FlashState::Ready)
            .or_else(|e| {
                if e.kind::<EfwProtocolError>() == Some(EfwProtocolError::FlashBusy) {
                    Ok(FlashState::Busy)
                } else {
                    Err(e)
                }
            })
    }

    /// Retrieve the base offset of session data in flash memory.
    fn flash_session_base(&mut self, timeout_ms: u32) -> Result<u32, Error> {
        let mut params = vec![0; 1];
        self.transaction(CATEGORY_FLASH, CMD_SESSION_BASE, &[], &mut params, timeout_ms)
            .map(|_| params[0])
    }

    /// Lock or unlock flash memory. The operation is available in the combination of IceLynx
    /// Micro and FPGA.
    fn flash_lock(&mut self, locked: bool, timeout_ms: u32) -> Result<(), Error> {
        let args = [locked as u32];
        let mut params = vec![0; 1];
        self.transaction(CATEGORY_FLASH, CMD_LOCK, &args, &mut params, timeout_ms)
    }

    /// Erase the block to which the offset belongs, then poll the state of flash controller
    /// until it gets ready. The controller can be unresponsive to unrelated commands while
    /// erasing, thus any error during polling counts as still busy.
    fn flash_erase_and_wait(&mut self, offset: u32, timeout_ms: u32) -> Result<(), Error> {
        self.flash_erase(offset, timeout_ms)?;

        loop {
            match self.flash_state(timeout_ms) {
                Ok(FlashState::Ready) => break Ok(()),
                Ok(FlashState::Busy) => debug!(offset, "flash keeps busy"),
                Err(e) => debug!(offset, %e, "flash state polling"),
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Read the given number of quadlets from the offset in flash memory, split by the
    /// capacity of one transaction.
    fn flash_recursive_read(
        &mut self,
        offset: u32,
        data: &mut [u32],
        timeout_ms: u32,
    ) -> Result<(), Error> {
        let mut offset = offset;
        let mut data = data;

        while data.len() > 0 {
            let count = data.len().min(FLASH_FRAME_MAX_QUADS);
            self.flash_read(offset, &mut data[..count], timeout_ms)?;

            offset += (count * 4) as u32;
            data = &mut data[count..];
        }

        Ok(())
    }

    /// Write the given quadlets to the offset in flash memory, split by the capacity of one
    /// transaction. The state of flash controller is polled between chunks with the same
    /// cadence as the erase operation.
    fn flash_recursive_write(
        &mut self,
        offset: u32,
        data: &[u32],
        timeout_ms: u32,
    ) -> Result<(), Error> {
        let mut offset = offset;
        let mut data = data;

        while data.len() > 0 {
            let count = data.len().min(FLASH_FRAME_MAX_QUADS);
            self.flash_write(offset, &data[..count], timeout_ms)?;

            offset += (count * 4) as u32;
            data = &data[count..];

            loop {
                match self.flash_state(timeout_ms) {
                    Ok(FlashState::Ready) => break,
                    Ok(FlashState::Busy) => debug!(offset, "flash keeps busy"),
                    Err(e) => debug!(offset, %e, "flash state polling"),
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        }

        Ok(())
    }
}

impl<O: EfwProtocol> FlashProtocol for O {}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Instant;

    const TIMEOUT: u32 = 10;

    #[test]
    fn block_size_by_offset() {
        assert_eq!(flash_block_size(0x00000000).unwrap(), 0x2000);
        assert_eq!(flash_block_size(0x0000ffff).unwrap(), 0x2000);
        assert_eq!(flash_block_size(0x00010000).unwrap(), 0x10000);
        assert_eq!(flash_block_size(0x001fffff).unwrap(), 0x10000);

        let err = flash_block_size(0x00200000).unwrap_err();
        assert_eq!(err.kind::<FileError>(), Some(FileError::Nxio));

        // Alignment is expressed by the remainder against the size of block.
        [0x0u32, 0x2000, 0xe000, 0x10000, 0x1f0000]
            .iter()
            .for_each(|&offset| {
                assert_eq!(offset % flash_block_size(offset).unwrap(), 0);
            });
        assert!(0x2100 % flash_block_size(0x2100).unwrap() > 0);
        assert!(0x18000 % flash_block_size(0x18000).unwrap() > 0);
    }

    // Emulate the state machine of flash controller with the two blocks below offset 0x10000.
    // At initial state the memory is locked against erase and write operation.
    struct StateMachine {
        memory: Vec<u8>,
        locked: bool,
    }

    const TEST_BLOCK_SIZE: usize = 0x2000;

    impl Default for StateMachine {
        fn default() -> Self {
            Self {
                memory: vec![0; 2 * TEST_BLOCK_SIZE],
                locked: true,
            }
        }
    }

    impl StateMachine {
        fn erase_block(&mut self, args: &[u32], params: &mut Vec<u32>) -> Result<(), Error> {
            assert_eq!(args.len(), 1);
            let pos = args[0] as usize;
            assert_eq!(pos % TEST_BLOCK_SIZE, 0);
            assert!(pos + TEST_BLOCK_SIZE <= self.memory.len());

            if self.locked {
                Err(Error::new(EfwProtocolError::FlashBusy, "locked"))
            } else {
                self.memory[pos..(pos + TEST_BLOCK_SIZE)].fill(0xff);
                params.truncate(0);
                Ok(())
            }
        }

        fn read_data(&self, args: &[u32], params: &mut Vec<u32>) -> Result<(), Error> {
            assert_eq!(args.len(), 2);
            let offset = args[0] as usize;
            let count = args[1] as usize;
            assert!(offset + 4 * count <= self.memory.len());

            params.truncate(2 + count);
            params[0] = args[0];
            params[1] = args[1];

            let mut quadlet = [0; 4];
            params[2..].iter_mut().enumerate().for_each(|(i, d)| {
                let pos = offset + i * 4;
                quadlet.copy_from_slice(&self.memory[pos..(pos + 4)]);
                *d = u32::from_be_bytes(quadlet);
            });
            Ok(())
        }

        fn write_data(&mut self, args: &[u32], params: &mut Vec<u32>) -> Result<(), Error> {
            assert!(args.len() >= 2);
            let offset = args[0] as usize;
            let count = args[1] as usize;
            let data = &args[2..];
            assert_eq!(data.len(), count);
            assert!(count <= FLASH_FRAME_MAX_QUADS);
            assert!(offset + 4 * count <= self.memory.len());

            if self.locked {
                Err(Error::new(EfwProtocolError::FlashBusy, "locked"))
            } else {
                data.iter().enumerate().for_each(|(i, d)| {
                    let pos = offset + i * 4;
                    self.memory[pos..(pos + 4)].copy_from_slice(&d.to_be_bytes());
                });
                params.truncate(2);
                params[0] = args[0];
                params[1] = args[1];
                Ok(())
            }
        }

        fn get_state(&self, args: &[u32], params: &mut Vec<u32>) -> Result<(), Error> {
            assert_eq!(args.len(), 0);
            params.truncate(0);
            if self.locked {
                Err(Error::new(EfwProtocolError::FlashBusy, "locked"))
            } else {
                Ok(())
            }
        }

        fn get_session_base(&self, args: &[u32], params: &mut Vec<u32>) -> Result<(), Error> {
            assert_eq!(args.len(), 0);
            params.truncate(1);
            params[0] = TEST_BLOCK_SIZE as u32;
            Ok(())
        }

        fn lock_memory(&mut self, args: &[u32], params: &mut Vec<u32>) -> Result<(), Error> {
            assert_eq!(args.len(), 1);
            self.locked = args[0] > 0;
            params.truncate(1);
            params[0] = args[0];
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestInstance(StateMachine);

    impl EfwProtocol for TestInstance {
        fn transaction(
            &mut self,
            category: u32,
            command: u32,
            args: &[u32],
            params: &mut Vec<u32>,
            _: u32,
        ) -> Result<(), Error> {
            assert_eq!(category, CATEGORY_FLASH);
            match command {
                CMD_ERASE => self.0.erase_block(args, params),
                CMD_READ => self.0.read_data(args, params),
                CMD_WRITE => self.0.write_data(args, params),
                CMD_STATE => self.0.get_state(args, params),
                CMD_SESSION_BASE => self.0.get_session_base(args, params),
                CMD_LOCK => self.0.lock_memory(args, params),
                _ => unreachable!(),
            }
        }
    }

    #[test]
    fn flash_lock_gates_operations() {
        let mut proto = TestInstance::default();

        // The initial state refuses erase and write.
        let err = proto.flash_erase(0x2000, TIMEOUT).unwrap_err();
        assert_eq!(err.kind::<EfwProtocolError>(), Some(EfwProtocolError::FlashBusy));

        let err = proto.flash_write(0x2000, &[0; 16], TIMEOUT).unwrap_err();
        assert_eq!(err.kind::<EfwProtocolError>(), Some(EfwProtocolError::FlashBusy));

        assert_eq!(proto.flash_state(TIMEOUT).unwrap(), FlashState::Busy);

        // The read operation is always available.
        let mut data = vec![0; 8];
        proto.flash_read(0, &mut data, TIMEOUT).unwrap();

        proto.flash_lock(false, TIMEOUT).unwrap();
        assert_eq!(proto.flash_state(TIMEOUT).unwrap(), FlashState::Ready);

        proto.flash_erase(0x2000, TIMEOUT).unwrap();
        proto.flash_write(0x2000, &[0; 16], TIMEOUT).unwrap();

        proto.flash_lock(true, TIMEOUT).unwrap();
        let err = proto.flash_erase(0x2000, TIMEOUT).unwrap_err();
        assert_eq!(err.kind::<EfwProtocolError>(), Some(EfwProtocolError::FlashBusy));
    }

    #[test]
    fn flash_erase_requires_block_alignment() {
        let mut proto = TestInstance::default();

        let err = proto.flash_erase(0x100, TIMEOUT).unwrap_err();
        assert_eq!(err.kind::<FileError>(), Some(FileError::Inval));

        let err = proto.flash_erase(0x00200000, TIMEOUT).unwrap_err();
        assert_eq!(err.kind::<FileError>(), Some(FileError::Nxio));
    }

    #[test]
    fn flash_write_then_read_back() {
        let mut proto = TestInstance::default();
        proto.flash_lock(false, TIMEOUT).unwrap();

        let data: Vec<u32> = (0..FLASH_FRAME_MAX_QUADS).map(|i| u32::MAX - i as u32).collect();
        proto.flash_write(0x2000, &data, TIMEOUT).unwrap();

        let mut readback = vec![0; FLASH_FRAME_MAX_QUADS];
        proto.flash_read(0x2000, &mut readback, TIMEOUT).unwrap();
        assert_eq!(readback, data);
    }

    #[test]
    fn flash_transaction_capacity() {
        let mut proto = TestInstance::default();

        let mut data = vec![0; FLASH_FRAME_MAX_QUADS + 1];
        let err = proto.flash_read(0, &mut data, TIMEOUT).unwrap_err();
        assert_eq!(err.kind::<FileError>(), Some(FileError::Inval));

        let err = proto.flash_write(0, &data, TIMEOUT).unwrap_err();
        assert_eq!(err.kind::<FileError>(), Some(FileError::Inval));
    }

    // Answer the read command with an echo for a different offset.
    struct BrokenEcho;

    impl EfwProtocol for BrokenEcho {
        fn transaction(
            &mut self,
            _: u32,
            command: u32,
            args: &[u32],
            params: &mut Vec<u32>,
            _: u32,
        ) -> Result<(), Error> {
            assert_eq!(command, CMD_READ);
            params.truncate(2 + args[1] as usize);
            params[0] = args[0] + 4;
            params[1] = args[1];
            Ok(())
        }
    }

    #[test]
    fn flash_read_checks_echo() {
        let mut proto = BrokenEcho;
        let mut data = vec![0; 4];
        let err = proto.flash_read(0x1000, &mut data, TIMEOUT).unwrap_err();
        assert_eq!(err.kind::<FileError>(), Some(FileError::Io));
    }

    // Report the busy state for the given count of polls, an intermitting communication error,
    // then the ready state.
    struct SlowErase {
        polls: u32,
        busy_count: u32,
        comm_err_at: Option<u32>,
    }

    impl EfwProtocol for SlowErase {
        fn transaction(
            &mut self,
            _: u32,
            command: u32,
            _: &[u32],
            params: &mut Vec<u32>,
            _: u32,
        ) -> Result<(), Error> {
            params.truncate(0);
            match command {
                CMD_ERASE => Ok(()),
                CMD_STATE => {
                    let i = self.polls;
                    self.polls += 1;
                    if self.comm_err_at == Some(i) {
                        Err(Error::new(EfwProtocolError::CommErr, "transient"))
                    } else if i < self.busy_count {
                        Err(Error::new(EfwProtocolError::FlashBusy, "busy"))
                    } else {
                        Ok(())
                    }
                }
                _ => unreachable!(),
            }
        }
    }

    #[test]
    fn erase_and_wait_polls_until_ready() {
        let mut proto = SlowErase {
            polls: 0,
            busy_count: 4,
            comm_err_at: None,
        };

        let begin = Instant::now();
        proto.flash_erase_and_wait(0x2000, TIMEOUT).unwrap();
        let elapsed = begin.elapsed();

        assert_eq!(proto.polls, 5);
        assert!(elapsed >= Duration::from_millis(1900));
        assert!(elapsed < Duration::from_millis(2600));
    }

    #[test]
    fn erase_and_wait_swallows_transient_error() {
        let mut proto = SlowErase {
            polls: 0,
            busy_count: 2,
            comm_err_at: Some(0),
        };

        proto.flash_erase_and_wait(0x2000, TIMEOUT).unwrap();
        assert_eq!(proto.polls, 3);
    }

    // Record the chunks which recursive operations issue.
    #[derive(Default)]
    struct ChunkRecorder {
        reads: Vec<(u32, usize)>,
        writes: Vec<(u32, usize)>,
    }

    impl EfwProtocol for ChunkRecorder {
        fn transaction(
            &mut self,
            _: u32,
            command: u32,
            args: &[u32],
            params: &mut Vec<u32>,
            _: u32,
        ) -> Result<(), Error> {
            match command {
                CMD_READ => {
                    self.reads.push((args[0], args[1] as usize));
                    params.truncate(2 + args[1] as usize);
                    params[0] = args[0];
                    params[1] = args[1];
                    params[2..].iter_mut().for_each(|q| *q = 0);
                    Ok(())
                }
                CMD_WRITE => {
                    self.writes.push((args[0], args[1] as usize));
                    params.truncate(0);
                    Ok(())
                }
                CMD_STATE => {
                    params.truncate(0);
                    Ok(())
                }
                _ => unreachable!(),
            }
        }
    }

    #[test]
    fn recursive_read_splits_by_transaction_capacity() {
        let mut proto = ChunkRecorder::default();
        let mut data = vec![0; 130];
        proto.flash_recursive_read(0x1000, &mut data, TIMEOUT).unwrap();
        assert_eq!(&proto.reads, &[(0x1000, 64), (0x1100, 64), (0x1200, 2)]);
    }

    #[test]
    fn recursive_write_splits_by_transaction_capacity() {
        let mut proto = ChunkRecorder::default();
        let data = vec![0; 100];
        proto.flash_recursive_write(0x2000, &data, TIMEOUT).unwrap();
        assert_eq!(&proto.writes, &[(0x2000, 64), (0x2100, 36)]);
    }
}
