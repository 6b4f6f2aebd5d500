//! MRC volumetric file reader/writer.
//!
//! 1024-byte little-endian header followed by `N^3` float32 voxels in
//! (slowest -> fastest) K,J,I order. Field offsets match the layout used by
//! `r_mrc`/`read_mrc`/`write_mrc` in the original source.

use crate::error::HeaderError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ss_core::Volume;
use std::io::{Read, Write};

pub const HEADER_BYTES: usize = 1024;

/// The fixed-layout MRC header. Every field below is preserved across a
/// read/write round trip except the five the writer recomputes from the new
/// data: `nx`/`ny`/`nz`/`mx`/`my`/`mz`, `dmin`/`dmax`/`dmean`, and `rms`.
#[derive(Debug, Clone)]
pub struct MrcHeader {
    pub nx: i32,
    pub ny: i32,
    pub nz: i32,
    pub mode: i32,
    pub nstart: [i32; 3],
    pub m: [i32; 3],
    pub cell_length: [f32; 3],
    pub cell_angle: [f32; 3],
    pub map_crs: [i32; 3],
    pub dmin: f32,
    pub dmax: f32,
    pub dmean: f32,
    pub ispg: i32,
    pub nsymbt: i32,
    pub extra: [i32; 25],
    pub origin: [i32; 3],
    pub map_string: [u8; 4],
    pub machine_stamp: [u8; 4],
    pub rms: f32,
    pub nlabl: i32,
    pub labels: [u8; 800],
}

/// Only mode 2 (float32) volumes are accepted.
pub const MODE_FLOAT32: i32 = 2;

impl MrcHeader {
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, HeaderError> {
        let mut buf = [0u8; HEADER_BYTES];
        let mut filled = 0usize;
        loop {
            match r.read(&mut buf[filled..])? {
                0 => break,
                n => {
                    filled += n;
                    if filled == HEADER_BYTES {
                        break;
                    }
                }
            }
        }
        if filled < HEADER_BYTES {
            return Err(HeaderError::Truncated { expected: HEADER_BYTES, got: filled });
        }
        let mut c = std::io::Cursor::new(buf);

        let nx = c.read_i32::<LittleEndian>()?;
        let ny = c.read_i32::<LittleEndian>()?;
        let nz = c.read_i32::<LittleEndian>()?;
        let mode = c.read_i32::<LittleEndian>()?;
        let nstart = [
            c.read_i32::<LittleEndian>()?,
            c.read_i32::<LittleEndian>()?,
            c.read_i32::<LittleEndian>()?,
        ];
        let m = [
            c.read_i32::<LittleEndian>()?,
            c.read_i32::<LittleEndian>()?,
            c.read_i32::<LittleEndian>()?,
        ];
        let cell_length = [
            c.read_f32::<LittleEndian>()?,
            c.read_f32::<LittleEndian>()?,
            c.read_f32::<LittleEndian>()?,
        ];
        let cell_angle = [
            c.read_f32::<LittleEndian>()?,
            c.read_f32::<LittleEndian>()?,
            c.read_f32::<LittleEndian>()?,
        ];
        let map_crs = [
            c.read_i32::<LittleEndian>()?,
            c.read_i32::<LittleEndian>()?,
            c.read_i32::<LittleEndian>()?,
        ];
        let dmin = c.read_f32::<LittleEndian>()?;
        let dmax = c.read_f32::<LittleEndian>()?;
        let dmean = c.read_f32::<LittleEndian>()?;
        let ispg = c.read_i32::<LittleEndian>()?;
        let nsymbt = c.read_i32::<LittleEndian>()?;
        let mut extra = [0i32; 25];
        for e in extra.iter_mut() {
            *e = c.read_i32::<LittleEndian>()?;
        }
        let origin = [
            c.read_i32::<LittleEndian>()?,
            c.read_i32::<LittleEndian>()?,
            c.read_i32::<LittleEndian>()?,
        ];
        let mut map_string = [0u8; 4];
        c.read_exact(&mut map_string)?;
        let mut machine_stamp = [0u8; 4];
        c.read_exact(&mut machine_stamp)?;
        let rms = c.read_f32::<LittleEndian>()?;
        let nlabl = c.read_i32::<LittleEndian>()?;
        let mut labels = [0u8; 800];
        c.read_exact(&mut labels)?;

        if mode != MODE_FLOAT32 {
            return Err(HeaderError::UnsupportedMode { mode });
        }
        if nx != ny || ny != nz {
            return Err(HeaderError::NotCube { nx, ny, nz });
        }

        Ok(MrcHeader {
            nx,
            ny,
            nz,
            mode,
            nstart,
            m,
            cell_length,
            cell_angle,
            map_crs,
            dmin,
            dmax,
            dmean,
            ispg,
            nsymbt,
            extra,
            origin,
            map_string,
            machine_stamp,
            rms,
            nlabl,
            labels,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), HeaderError> {
        w.write_i32::<LittleEndian>(self.nx)?;
        w.write_i32::<LittleEndian>(self.ny)?;
        w.write_i32::<LittleEndian>(self.nz)?;
        w.write_i32::<LittleEndian>(self.mode)?;
        for v in self.nstart {
            w.write_i32::<LittleEndian>(v)?;
        }
        for v in self.m {
            w.write_i32::<LittleEndian>(v)?;
        }
        for v in self.cell_length {
            w.write_f32::<LittleEndian>(v)?;
        }
        for v in self.cell_angle {
            w.write_f32::<LittleEndian>(v)?;
        }
        for v in self.map_crs {
            w.write_i32::<LittleEndian>(v)?;
        }
        w.write_f32::<LittleEndian>(self.dmin)?;
        w.write_f32::<LittleEndian>(self.dmax)?;
        w.write_f32::<LittleEndian>(self.dmean)?;
        w.write_i32::<LittleEndian>(self.ispg)?;
        w.write_i32::<LittleEndian>(self.nsymbt)?;
        for v in self.extra {
            w.write_i32::<LittleEndian>(v)?;
        }
        for v in self.origin {
            w.write_i32::<LittleEndian>(v)?;
        }
        w.write_all(&self.map_string)?;
        w.write_all(&self.machine_stamp)?;
        w.write_f32::<LittleEndian>(self.rms)?;
        w.write_i32::<LittleEndian>(self.nlabl)?;
        w.write_all(&self.labels)?;
        Ok(())
    }

    /// Cube side length. Read/write already enforce `nx == ny == nz`.
    pub fn side(&self) -> usize {
        self.nx as usize
    }

    /// Pixel spacing in Angstrom/voxel: `cell_length.x / nx`.
    pub fn apix(&self) -> f64 {
        self.cell_length[0] as f64 / self.nx as f64
    }

    /// Recompute `nx/ny/nz`, `mx/my/mz`, `dmin/dmax/dmean`, `rms` from new
    /// data; every other field is left untouched.
    fn recompute_stats(&mut self, side: usize, data: &[f64]) {
        self.nx = side as i32;
        self.ny = side as i32;
        self.nz = side as i32;
        self.m = [side as i32, side as i32, side as i32];
        let mut dmin = f64::INFINITY;
        let mut dmax = f64::NEG_INFINITY;
        let mut sum = 0.0f64;
        let mut sumsq = 0.0f64;
        for &v in data {
            if v < dmin {
                dmin = v;
            }
            if v > dmax {
                dmax = v;
            }
            sum += v;
            sumsq += v * v;
        }
        let n = data.len() as f64;
        let mean = sum / n;
        let rms = ((sumsq / n) - mean * mean).max(0.0).sqrt();
        self.dmin = dmin as f32;
        self.dmax = dmax as f32;
        self.dmean = mean as f32;
        self.rms = rms as f32;
    }
}

/// Read a cubic float32 MRC volume: header plus `N^3` voxels.
pub fn read_volume<R: Read>(r: &mut R) -> Result<(MrcHeader, Volume), HeaderError> {
    let header = MrcHeader::read_from(r)?;
    let side = header.side();
    let expected = side * side * side;
    let mut data = Vec::with_capacity(expected);
    for _ in 0..expected {
        match r.read_f32::<LittleEndian>() {
            Ok(v) => data.push(v as f64),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(HeaderError::DataTruncated { expected, got: data.len() })
            }
            Err(e) => return Err(HeaderError::Io(e)),
        }
    }
    Ok((header, Volume::from_data(side, data)))
}

/// Write a volume using `header`'s preserved fields, recomputing the
/// data-derived ones.
pub fn write_volume<W: Write>(
    w: &mut W,
    header: &MrcHeader,
    volume: &Volume,
) -> Result<(), HeaderError> {
    let mut out = header.clone();
    out.recompute_stats(volume.side(), volume.as_slice());
    out.write_to(w)?;
    for &v in volume.as_slice() {
        w.write_f32::<LittleEndian>(v as f32)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_header(n: i32) -> MrcHeader {
        MrcHeader {
            nx: n,
            ny: n,
            nz: n,
            mode: MODE_FLOAT32,
            nstart: [0, 0, 0],
            m: [n, n, n],
            cell_length: [n as f32, n as f32, n as f32],
            cell_angle: [90.0, 90.0, 90.0],
            map_crs: [1, 2, 3],
            dmin: 0.0,
            dmax: 0.0,
            dmean: 0.0,
            ispg: 1,
            nsymbt: 0,
            extra: [0; 25],
            origin: [0, 0, 0],
            map_string: *b"MAP ",
            machine_stamp: [0x44, 0x41, 0, 0],
            rms: 0.0,
            nlabl: 0,
            labels: [0u8; 800],
        }
    }

    #[test]
    fn header_round_trip_preserves_fields() {
        let header = sample_header(4);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_BYTES);
        let mut cur = Cursor::new(buf);
        let back = MrcHeader::read_from(&mut cur).unwrap();
        assert_eq!(back.nx, header.nx);
        assert_eq!(back.map_crs, header.map_crs);
        assert_eq!(back.map_string, header.map_string);
    }

    #[test]
    fn volume_round_trip_data_unchanged_stats_recomputed() {
        let n = 3usize;
        let header = sample_header(n as i32);
        let data: Vec<f64> = (0..n * n * n).map(|i| i as f64 * 0.5).collect();
        let volume = Volume::from_data(n, data.clone());

        let mut buf = Vec::new();
        write_volume(&mut buf, &header, &volume).unwrap();

        let mut cur = Cursor::new(buf);
        let (read_header, read_volume) = read_volume(&mut cur).unwrap();
        assert_eq!(read_volume.as_slice(), volume.as_slice());
        assert_eq!(read_header.dmin, 0.0);
        assert_eq!(read_header.dmax, *data.last().unwrap() as f32);
        assert_eq!(read_header.map_crs, header.map_crs);
    }

    #[test]
    fn rejects_non_float32_mode() {
        let mut header = sample_header(4);
        header.mode = 1;
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        let mut cur = Cursor::new(buf);
        let err = MrcHeader::read_from(&mut cur).unwrap_err();
        assert!(matches!(err, HeaderError::UnsupportedMode { mode: 1 }));
    }

    #[test]
    fn rejects_non_cube() {
        let mut header = sample_header(4);
        header.ny = 5;
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        let mut cur = Cursor::new(buf);
        let err = MrcHeader::read_from(&mut cur).unwrap_err();
        assert!(matches!(err, HeaderError::NotCube { .. }));
    }
}
