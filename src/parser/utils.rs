/*!
Bounds-checked read helpers over [`Bytes`].
*/
use bytes::{Buf, Bytes};
use ipnet::{Ipv4Net, Ipv6Net};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Low-level read failure. Callers translate this into the protocol error
/// that fits their context (attribute length vs. message length vs. network
/// field).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ReadError {
    /// Fewer bytes remain than the encoding requires.
    Truncated,
    /// NLRI bit length exceeds the address family maximum.
    InvalidPrefixLength(u8),
}

pub type ReadResult<T> = Result<T, ReadError>;

/// Read helpers for network-order scalars, addresses, and NLRI-encoded
/// prefixes. Implemented for [`Bytes`]; every method checks `remaining()`
/// before consuming.
pub trait ReadUtils: Buf {
    #[inline]
    fn has_n_remaining(&self, n: usize) -> ReadResult<()> {
        if self.remaining() < n {
            Err(ReadError::Truncated)
        } else {
            Ok(())
        }
    }

    #[inline]
    fn read_u8(&mut self) -> ReadResult<u8> {
        self.has_n_remaining(1)?;
        Ok(self.get_u8())
    }

    #[inline]
    fn read_u16(&mut self) -> ReadResult<u16> {
        self.has_n_remaining(2)?;
        Ok(self.get_u16())
    }

    #[inline]
    fn read_u32(&mut self) -> ReadResult<u32> {
        self.has_n_remaining(4)?;
        Ok(self.get_u32())
    }

    fn read_n_bytes(&mut self, n: usize) -> ReadResult<Vec<u8>> {
        self.has_n_remaining(n)?;
        let mut buffer = vec![0; n];
        self.copy_to_slice(&mut buffer);
        Ok(buffer)
    }

    fn read_ipv4_address(&mut self) -> ReadResult<Ipv4Addr> {
        Ok(Ipv4Addr::from(self.read_u32()?))
    }

    fn read_ipv6_address(&mut self) -> ReadResult<Ipv6Addr> {
        self.has_n_remaining(16)?;
        let mut buf = [0u8; 16];
        self.copy_to_slice(&mut buf);
        Ok(Ipv6Addr::from(buf))
    }

    /// Reads one NLRI-encoded IPv4 prefix: a bit-length octet then
    /// `ceil(len/8)` address octets. Host bits are masked off.
    fn read_v4_nlri_prefix(&mut self) -> ReadResult<Ipv4Net> {
        let bit_len = self.read_u8()?;
        if bit_len > 32 {
            return Err(ReadError::InvalidPrefixLength(bit_len));
        }
        let byte_len = (bit_len as usize).div_ceil(8);
        self.has_n_remaining(byte_len)?;
        let mut buf = [0u8; 4];
        self.copy_to_slice(&mut buf[..byte_len]);
        // bit_len already validated
        let net = Ipv4Net::new(Ipv4Addr::from(buf), bit_len).unwrap();
        Ok(net.trunc())
    }

    /// Reads one NLRI-encoded IPv6 prefix.
    fn read_v6_nlri_prefix(&mut self) -> ReadResult<Ipv6Net> {
        let bit_len = self.read_u8()?;
        if bit_len > 128 {
            return Err(ReadError::InvalidPrefixLength(bit_len));
        }
        let byte_len = (bit_len as usize).div_ceil(8);
        self.has_n_remaining(byte_len)?;
        let mut buf = [0u8; 16];
        self.copy_to_slice(&mut buf[..byte_len]);
        let net = Ipv6Net::new(Ipv6Addr::from(buf), bit_len).unwrap();
        Ok(net.trunc())
    }

    /// Reads IPv4 prefixes until the buffer is exhausted.
    fn read_v4_nlri_list(&mut self) -> ReadResult<Vec<Ipv4Net>> {
        let mut prefixes = Vec::new();
        while self.remaining() > 0 {
            prefixes.push(self.read_v4_nlri_prefix()?);
        }
        Ok(prefixes)
    }

    /// Reads IPv6 prefixes until the buffer is exhausted.
    fn read_v6_nlri_list(&mut self) -> ReadResult<Vec<Ipv6Net>> {
        let mut prefixes = Vec::new();
        while self.remaining() > 0 {
            prefixes.push(self.read_v6_nlri_prefix()?);
        }
        Ok(prefixes)
    }
}

impl ReadUtils for Bytes {}
