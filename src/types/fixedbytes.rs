//! Opaque fixed-size byte blobs.

use crate::{DTypeError, Result};

/// `fixedbytes[N, align=A]`: `N` opaque bytes aligned to `A`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FixedBytesType {
    data_size: usize,
    alignment: usize,
}

impl FixedBytesType {
    pub fn new(data_size: usize, alignment: usize) -> Result<Self> {
        if data_size == 0 {
            return Err(DTypeError::InvalidArgument(
                "fixedbytes size must be nonzero".to_string(),
            ));
        }
        if !alignment.is_power_of_two() || alignment > 16 {
            return Err(DTypeError::InvalidArgument(format!(
                "fixedbytes alignment {alignment} is not a power of two up to 16"
            )));
        }
        if data_size % alignment != 0 {
            return Err(DTypeError::InvalidArgument(format!(
                "fixedbytes size {data_size} is not a multiple of alignment {alignment}"
            )));
        }
        Ok(FixedBytesType {
            data_size,
            alignment,
        })
    }

    #[inline]
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    #[inline]
    pub fn alignment(&self) -> usize {
        self.alignment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(FixedBytesType::new(4, 4).is_ok());
        assert!(FixedBytesType::new(0, 1).is_err());
        assert!(FixedBytesType::new(6, 4).is_err());
        assert!(FixedBytesType::new(8, 3).is_err());
    }
}
