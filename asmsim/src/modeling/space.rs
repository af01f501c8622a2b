use crate::AsmSimError;
use crate::AsmSimError::{MismatchedAddressSize, UnexpectedArraySort, ZeroSizedAccess};
use z3::Sort;
use z3::ast::{Array, Ast, BV};

/// Width of a memory address in the model. 32-bit addresses are zero-extended.
pub const ADDRESS_BITS: u32 = 64;

/// Byte-addressed little-endian memory modeled as an SMT array from 64-bit addresses to bytes.
///
/// Memory contents at the start of a window are defined but unknown, so both lanes of an
/// execution start from the same array.
#[derive(Clone, Debug)]
pub struct ModeledMemory {
    data: Array,
}

impl ModeledMemory {
    pub fn fresh_const(name: &str) -> Self {
        let domain = Sort::bitvector(ADDRESS_BITS);
        let range = Sort::bitvector(8);
        Self {
            data: Array::fresh_const(name, &domain, &range),
        }
    }

    /// Read `size_bytes` bytes starting at `offset`
    pub fn read(&self, offset: &BV, size_bytes: usize) -> Result<BV, AsmSimError> {
        if offset.get_size() != ADDRESS_BITS {
            return Err(MismatchedAddressSize);
        }
        read_from_array(&self.data, offset, size_bytes)
    }

    /// Write the given bitvector starting at `offset`. The width of `val` must be a multiple of
    /// 8.
    pub fn write(&mut self, val: &BV, offset: &BV) -> Result<(), AsmSimError> {
        if offset.get_size() != ADDRESS_BITS {
            return Err(MismatchedAddressSize);
        }
        if val.get_size() == 0 || val.get_size() % 8 != 0 {
            return Err(ZeroSizedAccess);
        }
        self.data = write_to_array(&self.data, val, offset);
        Ok(())
    }
}

fn read_from_array(array: &Array, offset: &BV, size_bytes: usize) -> Result<BV, AsmSimError> {
    // concat left hand is most significant
    (0..size_bytes)
        .map(|i| {
            array
                .select(&offset.bvadd(&BV::from_u64(i as u64, ADDRESS_BITS)))
                .as_bv()
                .ok_or(UnexpectedArraySort)
        })
        .reduce(|acc, byte_bv| Ok(byte_bv?.concat(&acc?)))
        .ok_or(ZeroSizedAccess)?
}

fn write_to_array(array: &Array, val: &BV, offset: &BV) -> Array {
    let mut scratch = array.clone();
    let size = val.get_size();
    for i in 0..size / 8 {
        let byte = val.extract(8 * (i + 1) - 1, 8 * i);
        let address = offset.bvadd(&BV::from_u64(i as u64, ADDRESS_BITS));
        scratch = scratch.store(&address, &byte);
    }
    scratch
}
