// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Access masks and the device view used to evaluate them.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::frame::{Address, Frame};
use crate::queue::QueueType;

/// Trust conditions under which a matched inbound frame may be handled.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessMask(u8);

impl AccessMask {
    /// Never authorized.
    pub const NONE: AccessMask = AccessMask(0x00);
    /// Sender is one of the device's peers.
    pub const PAIRED_TO_SENDER: AccessMask = AccessMask(0x01);
    /// Frame is addressed to the device.
    pub const DEST_IS_ME: AccessMask = AccessMask(0x02);
    /// Sender is the device's central.
    pub const CENTRAL: AccessMask = AccessMask(0x04);
    /// Sender's queue is unpairing.
    pub const UNPAIRING: AccessMask = AccessMask(0x08);
    /// Always authorized.
    pub const FULL: AccessMask = AccessMask(0x80);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: AccessMask) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if at least one set bit holds for `frame` in `ctx`.
    pub fn permits(self, frame: &Frame, ctx: &AccessContext<'_>) -> bool {
        if self.is_empty() {
            return false;
        }
        if self.contains(Self::FULL) {
            return true;
        }

        let device = ctx.device;
        (self.contains(Self::DEST_IS_ME) && frame.destination == device.address())
            || (self.contains(Self::CENTRAL) && device.central_address() == Some(frame.sender))
            || (self.contains(Self::UNPAIRING) && ctx.queue_type == Some(QueueType::Unpairing))
            || (self.contains(Self::PAIRED_TO_SENDER) && device.is_paired_to(frame.sender))
    }
}

impl BitOr for AccessMask {
    type Output = AccessMask;

    fn bitor(self, rhs: AccessMask) -> AccessMask {
        AccessMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for AccessMask {
    fn bitor_assign(&mut self, rhs: AccessMask) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for AccessMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(AccessMask, &str); 5] = [
            (AccessMask::PAIRED_TO_SENDER, "PAIRED_TO_SENDER"),
            (AccessMask::DEST_IS_ME, "DEST_IS_ME"),
            (AccessMask::CENTRAL, "CENTRAL"),
            (AccessMask::UNPAIRING, "UNPAIRING"),
            (AccessMask::FULL, "FULL"),
        ];

        if self.is_empty() {
            return write!(f, "AccessMask(NONE)");
        }
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "AccessMask({})", names.join(" | "))
    }
}

/// Non-owning view of the device a frame is evaluated for.
///
/// Implemented by the orchestration layer; the registry never holds on to it.
pub trait DeviceContext: Send + Sync {
    /// The device's own radio address.
    fn address(&self) -> Address;

    /// Address of the central this device is paired to.
    fn central_address(&self) -> Option<Address>;

    /// Whether `address` is one of the device's peers.
    fn is_paired_to(&self, address: Address) -> bool;

    /// Whether the device currently accepts pairing.
    fn in_pairing_mode(&self) -> bool;
}

/// Everything authorization looks at besides the frame.
#[derive(Clone, Copy)]
pub struct AccessContext<'a> {
    pub device: &'a dyn DeviceContext,
    /// Type of the sender's active queue, if any.
    pub queue_type: Option<QueueType>,
}

impl<'a> AccessContext<'a> {
    pub fn new(device: &'a dyn DeviceContext) -> Self {
        Self {
            device,
            queue_type: None,
        }
    }

    pub fn with_queue_type(mut self, queue_type: Option<QueueType>) -> Self {
        self.queue_type = queue_type;
        self
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) struct TestDevice {
        pub address: Address,
        pub central: Option<Address>,
        pub peers: Vec<Address>,
        pub pairing: bool,
    }

    impl TestDevice {
        pub fn new(address: u32) -> Self {
            Self {
                address: Address::new(address),
                central: None,
                peers: Vec::new(),
                pairing: false,
            }
        }
    }

    impl DeviceContext for TestDevice {
        fn address(&self) -> Address {
            self.address
        }

        fn central_address(&self) -> Option<Address> {
            self.central
        }

        fn is_paired_to(&self, address: Address) -> bool {
            self.peers.contains(&address)
        }

        fn in_pairing_mode(&self) -> bool {
            self.pairing
        }
    }

    fn frame(sender: u32, destination: u32) -> Frame {
        Frame::new(1, 0xA0, 0x02, Address::new(sender), Address::new(destination), vec![0x00])
    }

    #[test]
    fn test_empty_mask_never_permits() {
        let device = TestDevice::new(0x100);
        let ctx = AccessContext::new(&device);
        assert!(!AccessMask::NONE.permits(&frame(0x200, 0x100), &ctx));
    }

    #[test]
    fn test_full_always_permits() {
        let device = TestDevice::new(0x100);
        let ctx = AccessContext::new(&device);
        assert!(AccessMask::FULL.permits(&frame(0x999, 0x777), &ctx));
    }

    #[test]
    fn test_dest_is_me() {
        let device = TestDevice::new(0x100);
        let ctx = AccessContext::new(&device);
        assert!(AccessMask::DEST_IS_ME.permits(&frame(0x200, 0x100), &ctx));
        assert!(!AccessMask::DEST_IS_ME.permits(&frame(0x200, 0x101), &ctx));
    }

    #[test]
    fn test_central_and_paired() {
        let mut device = TestDevice::new(0x100);
        device.central = Some(Address::new(0x300));
        device.peers.push(Address::new(0x200));
        let ctx = AccessContext::new(&device);

        assert!(AccessMask::CENTRAL.permits(&frame(0x300, 0x100), &ctx));
        assert!(!AccessMask::CENTRAL.permits(&frame(0x200, 0x100), &ctx));
        assert!(AccessMask::PAIRED_TO_SENDER.permits(&frame(0x200, 0x100), &ctx));
        assert!(!AccessMask::PAIRED_TO_SENDER.permits(&frame(0x201, 0x100), &ctx));
    }

    #[test]
    fn test_unpairing_needs_unpairing_queue() {
        let device = TestDevice::new(0x100);
        let f = frame(0x200, 0x100);

        let ctx = AccessContext::new(&device).with_queue_type(Some(QueueType::Config));
        assert!(!AccessMask::UNPAIRING.permits(&f, &ctx));

        let ctx = ctx.with_queue_type(Some(QueueType::Unpairing));
        assert!(AccessMask::UNPAIRING.permits(&f, &ctx));
    }

    #[test]
    fn test_any_bit_suffices() {
        let device = TestDevice::new(0x100);
        let ctx = AccessContext::new(&device);
        let mask = AccessMask::PAIRED_TO_SENDER | AccessMask::DEST_IS_ME;

        // Not paired, but addressed to us.
        assert!(mask.permits(&frame(0x200, 0x100), &ctx));
        // Neither.
        assert!(!mask.permits(&frame(0x200, 0x101), &ctx));
    }

    #[test]
    fn test_debug_names() {
        let mask = AccessMask::DEST_IS_ME | AccessMask::CENTRAL;
        assert_eq!(format!("{:?}", mask), "AccessMask(DEST_IS_ME | CENTRAL)");
        assert_eq!(format!("{:?}", AccessMask::NONE), "AccessMask(NONE)");
    }
}
