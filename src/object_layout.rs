// SPDX-FileCopyrightText: 2024 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! Object-header collaborator.
//!
//! Reading an object's size and moving its bytes both require knowledge of
//! the heap's object layout, which this subsystem does not own. A real
//! collector's header format, alignment rules, and array-length encoding
//! all live behind [`ObjectLayout`].

use crate::color::ColouredAddress;

pub trait ObjectLayout {
    /// Reads the object header at `addr` and returns its size in bytes.
    /// The returned size is aligned and `>= 8`.
    fn object_size(&self, addr: ColouredAddress) -> usize;

    /// Raw memmove of `bytes` bytes from `from` to `to`. The caller (the
    /// [`crate::relocator::Relocator`]) is responsible for serialising
    /// concurrent copies of the same destination -- this call itself does
    /// no locking.
    fn object_copy(&self, from: ColouredAddress, to: ColouredAddress, bytes: usize);
}
