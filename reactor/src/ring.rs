//! io_uring wrapper with typed submission helpers.

use std::io;
use std::os::fd::RawFd;

use io_uring::types::Fd;
use io_uring::{IoUring, opcode};

use crate::completion::UserData;
use crate::error::Error;

pub struct Ring {
    pub(crate) ring: IoUring,
}

impl Ring {
    pub fn setup(sq_entries: u32) -> Result<Self, Error> {
        let ring = IoUring::builder()
            .build(sq_entries)
            .map_err(|e| Error::RingSetup(e.to_string()))?;
        Ok(Ring { ring })
    }

    /// Arm an Accept on the listen fd. The sockaddr storage must stay valid
    /// until the completion arrives (it lives in the connection record).
    pub fn submit_accept(
        &mut self,
        listen_fd: RawFd,
        addr: *mut libc::sockaddr,
        addrlen: *mut libc::socklen_t,
        ud: UserData,
    ) -> Result<(), Error> {
        let entry = opcode::Accept::new(Fd(listen_fd), addr, addrlen)
            .build()
            .user_data(ud.raw());
        unsafe { self.push_sqe(entry) }
    }

    /// Arm a Read into `buf`. Used both for ring-buffer reads and overflow
    /// reads; the buffer must stay valid until completion.
    pub fn submit_read(
        &mut self,
        fd: RawFd,
        buf: *mut u8,
        len: u32,
        ud: UserData,
    ) -> Result<(), Error> {
        let entry = opcode::Read::new(Fd(fd), buf, len)
            .build()
            .user_data(ud.raw());
        unsafe { self.push_sqe(entry) }
    }

    /// Arm a Write from `buf`; same validity rule as reads.
    pub fn submit_write(
        &mut self,
        fd: RawFd,
        buf: *const u8,
        len: u32,
        ud: UserData,
    ) -> Result<(), Error> {
        let entry = opcode::Write::new(Fd(fd), buf, len)
            .build()
            .user_data(ud.raw());
        unsafe { self.push_sqe(entry) }
    }

    pub fn submit_close(&mut self, fd: RawFd, ud: UserData) -> Result<(), Error> {
        let entry = opcode::Close::new(Fd(fd)).build().user_data(ud.raw());
        unsafe { self.push_sqe(entry) }
    }

    /// Arm the 8-byte eventfd read that wakes the reactor for queue drains
    /// and shutdown.
    pub fn submit_eventfd_read(
        &mut self,
        eventfd: RawFd,
        buf: *mut u8,
        ud: UserData,
    ) -> Result<(), Error> {
        let entry = opcode::Read::new(Fd(eventfd), buf, 8)
            .build()
            .user_data(ud.raw());
        unsafe { self.push_sqe(entry) }
    }

    /// Submit pending SQEs and wait for at least `min_complete` CQEs.
    pub fn submit_and_wait(&self, min_complete: u32) -> io::Result<()> {
        self.ring
            .submitter()
            .submit_and_wait(min_complete as usize)?;
        Ok(())
    }

    /// Submit pending SQEs without waiting.
    pub fn flush(&self) -> io::Result<()> {
        self.ring.submit()?;
        Ok(())
    }

    /// Push an SQE. If the submission queue is full, submit the current
    /// batch and retry once.
    ///
    /// # Safety
    /// The SQE must reference memory that stays valid for the lifetime of
    /// the operation.
    unsafe fn push_sqe(&mut self, entry: io_uring::squeue::Entry) -> Result<(), Error> {
        unsafe {
            if self.ring.submission().push(&entry).is_err() {
                self.ring.submit().map_err(Error::Io)?;
                self.ring
                    .submission()
                    .push(&entry)
                    .map_err(|_| Error::SubmissionQueueFull)?;
            }
        }
        Ok(())
    }
}
