use std::io::{Read, Write};

use derivative::Derivative;

use crate::{
    io,
    marshal::{Decode, Encode, FourCC},
    r#box::ReadFields,
    Error, Result,
};

/// Unrecognized payloads up to this size are kept in memory and written back verbatim.
pub const MAX_UNKNOWN_PAYLOAD: u64 = 1024 * 1024;

// 4.3
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTypeBox {
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: Vec<FourCC>,
}

impl Default for FileTypeBox {
    fn default() -> Self {
        Self {
            major_brand: FourCC::isom,
            minor_version: 0,
            compatible_brands: vec![FourCC::isom],
        }
    }
}

impl Encode for FileTypeBox {
    fn size(&self) -> u64 {
        4 + 4 + self.compatible_brands.len() as u64 * 4
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        self.major_brand.encode(output)?;
        self.minor_version.encode(output)?;
        for compatible_brand in &self.compatible_brands {
            compatible_brand.encode(output)?;
        }
        Ok(())
    }
}

impl Decode for FileTypeBox {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let major_brand = Decode::decode(input)?;
        let minor_version = Decode::decode(input)?;
        if input.len() % 4 != 0 {
            return Err(Error::malformed(
                FourCC::ftyp,
                format!("{} bytes of compatible brands", input.len()),
            ));
        }
        let mut compatible_brands = Vec::with_capacity(input.len() / 4);
        while !input.is_empty() {
            compatible_brands.push(Decode::decode(input)?);
        }

        Ok(Self {
            major_brand,
            minor_version,
            compatible_brands,
        })
    }
}

// 8.1.2
/// Padding of `len` bytes.
///
/// Payloads up to [`MAX_UNKNOWN_PAYLOAD`] are kept and written back verbatim, larger ones are
/// skipped and written back as zeros.
#[derive(Derivative, Clone, PartialEq, Eq)]
#[derivative(Debug)]
pub struct FreeSpaceBox {
    pub len: u64,
    #[derivative(Debug = "ignore")]
    pub data: Option<Vec<u8>>,
}

impl FreeSpaceBox {
    pub fn zeroed(len: u64) -> Self {
        Self { len, data: None }
    }
}

impl Default for FreeSpaceBox {
    fn default() -> Self {
        Self::zeroed(0)
    }
}

impl ReadFields for FreeSpaceBox {
    fn read(
        &mut self,
        _box_type: FourCC,
        input: &mut dyn Read,
        len: u64,
        buf: &mut Vec<u8>,
    ) -> Result<()> {
        self.len = len;
        if len <= MAX_UNKNOWN_PAYLOAD {
            io::read(input, len, buf)?;
            self.data = Some(buf.clone());
        } else {
            io::skip(input, len, buf)?;
            self.data = None;
        }
        Ok(())
    }
}

impl Encode for FreeSpaceBox {
    fn size(&self) -> u64 {
        self.len
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        match &self.data {
            Some(data) if data.len() as u64 == self.len => output.write_all(data)?,
            _ => {
                std::io::copy(&mut std::io::repeat(0).take(self.len), output)?;
            }
        }
        Ok(())
    }
}

/// Payload of a box without a dedicated type.
///
/// `data` is `None` when the payload was too large to keep and has been skipped. Such a box can
/// still be inspected but not written.
#[derive(Derivative, Clone, PartialEq, Eq)]
#[derivative(Debug)]
pub struct UnknownBox {
    #[derivative(Debug = "ignore")]
    pub data: Option<Vec<u8>>,
}

impl Default for UnknownBox {
    fn default() -> Self {
        Self {
            data: Some(Vec::new()),
        }
    }
}

impl ReadFields for UnknownBox {
    fn read(
        &mut self,
        _box_type: FourCC,
        input: &mut dyn Read,
        len: u64,
        buf: &mut Vec<u8>,
    ) -> Result<()> {
        if len <= MAX_UNKNOWN_PAYLOAD {
            io::read(input, len, buf)?;
            self.data = Some(buf.clone());
        } else {
            io::skip(input, len, buf)?;
            self.data = None;
        }
        Ok(())
    }
}

impl Encode for UnknownBox {
    fn size(&self) -> u64 {
        self.data.as_ref().map_or(0, |data| data.len() as u64)
    }

    fn encode(&self, output: &mut impl Write) -> Result<()> {
        if let Some(data) = &self.data {
            output.write_all(data)?;
        }
        Ok(())
    }
}
