// Copyright (c) 2013-2015 Sandstorm Development Group, Inc. and contributors
// Licensed under the MIT License:
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
// THE SOFTWARE.

use core::cell::Cell;

use crate::{Error, ErrorKind, Result};

/// The traversal budget of one reader arena, in words.
///
/// Every struct or list read charges its declared size, so a message whose
/// pointers alias the same region many times cannot make the receiver do
/// unbounded work.
pub struct ReadLimiter {
    limit: Cell<usize>,
    error_on_limit_exceeded: bool,
}

impl ReadLimiter {
    pub fn new(limit: Option<usize>) -> Self {
        match limit {
            Some(value) => Self {
                limit: Cell::new(value),
                error_on_limit_exceeded: true,
            },
            None => Self {
                limit: Cell::new(usize::MAX),
                error_on_limit_exceeded: false,
            },
        }
    }

    #[inline]
    pub fn can_read(&self, amount: usize) -> Result<()> {
        let current = self.limit.get();
        if amount > current && self.error_on_limit_exceeded {
            Err(Error::from_kind(ErrorKind::ReadLimitExceeded))
        } else {
            // The common case is current >= amount. Note that we only branch once in that case.
            // If we didn't have an error, we want to saturate to 0.
            self.limit.set(current.saturating_sub(amount));
            Ok(())
        }
    }

    /// Words left before the limit trips.
    pub fn remaining(&self) -> usize {
        self.limit.get()
    }
}

#[cfg(test)]
mod tests {
    use super::ReadLimiter;
    use crate::ErrorKind;

    #[test]
    fn budget_goes_down_and_then_fails() {
        let limiter = ReadLimiter::new(Some(10));
        limiter.can_read(4).unwrap();
        limiter.can_read(6).unwrap();
        assert_eq!(limiter.remaining(), 0);
        let err = limiter.can_read(1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReadLimitExceeded);
    }

    #[test]
    fn unlimited_never_fails() {
        let limiter = ReadLimiter::new(None);
        limiter.can_read(usize::MAX).unwrap();
        limiter.can_read(usize::MAX).unwrap();
    }
}
