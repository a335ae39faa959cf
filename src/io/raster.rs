use std::{fs::File, io::BufReader, path::{Path, PathBuf}};

use anyhow::Result;
use geo::{Coord, Rect};
use ndarray::Array2;
use tiff::{decoder::{Decoder, DecodingResult, Limits}, tags::Tag, ColorType};

use crate::{error::Error, geom::Crs};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GEOGRAPHIC_TYPE_KEY: u32 = 2048;
const PROJECTED_CS_TYPE_KEY: u32 = 3072;
const USER_DEFINED: u32 = 32767;

/// North-up affine transform, GDAL order without rotation terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct GeoTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub origin_y: f64,
    /// Negative for north-up rasters.
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Ground area of one pixel, `|a| * |e|`.
    #[inline] pub(crate) fn pixel_area(&self) -> f64 { self.pixel_width.abs() * self.pixel_height.abs() }

    /// Centre of pixel (`col`, `row`) in CRS units.
    #[inline]
    pub(crate) fn pixel_centre(&self, col: usize, row: usize) -> Coord<f64> {
        Coord {
            x: self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            y: self.origin_y + (row as f64 + 0.5) * self.pixel_height,
        }
    }

    /// Fractional column of an x coordinate.
    #[inline] pub(crate) fn col_of(&self, x: f64) -> f64 { (x - self.origin_x) / self.pixel_width }

    /// Fractional row of a y coordinate.
    #[inline] pub(crate) fn row_of(&self, y: f64) -> f64 { (y - self.origin_y) / self.pixel_height }
}

/// A window of a single-band categorical raster held in memory.
#[derive(Debug, Clone)]
pub(crate) struct Raster {
    /// Pixel classes indexed `[row, col]`.
    pub data: Array2<u16>,
    /// Transform of the window's top-left pixel.
    pub transform: GeoTransform,
    /// Nodata value declared by the file, if any.
    pub nodata: Option<u16>,
    pub crs: Crs,
    pub path: PathBuf,
    /// Full grid size of the file as (cols, rows).
    pub grid: (usize, usize),
}

impl Raster {
    #[inline] pub(crate) fn rows(&self) -> usize { self.data.nrows() }
    #[inline] pub(crate) fn cols(&self) -> usize { self.data.ncols() }

    /// Ground extent of the pixel grid.
    pub(crate) fn extent(&self) -> Rect<f64> {
        grid_extent(&self.transform, self.cols(), self.rows())
    }
}

fn grid_extent(t: &GeoTransform, cols: usize, rows: usize) -> Rect<f64> {
    Rect::new(
        Coord { x: t.origin_x, y: t.origin_y },
        Coord { x: t.origin_x + cols as f64 * t.pixel_width, y: t.origin_y + rows as f64 * t.pixel_height },
    )
}

fn raster_err(path: &Path, message: impl Into<String>) -> Error {
    Error::Raster { path: path.to_path_buf(), message: message.into() }
}

/// An open single-band 8- or 16-bit unsigned GeoTIFF.
///
/// Only the header is read on open; pixels are decoded per strip or tile by
/// [`GeoTiff::read_window`].
pub(crate) struct GeoTiff {
    decoder: Decoder<BufReader<File>>,
    width: usize,
    height: usize,
    pub transform: GeoTransform,
    pub nodata: Option<u16>,
    pub crs: Crs,
    path: PathBuf,
}

impl GeoTiff {
    /// `crs_override` replaces the CRS from the GeoKey directory; without one
    /// the file must declare a registry EPSG code.
    pub(crate) fn open(path: &Path, crs_override: Option<u32>) -> Result<Self> {
        let file = File::open(path).map_err(|e| raster_err(path, format!("failed to open: {e}")))?;
        let mut decoder = Decoder::new(BufReader::new(file))
            .map_err(|e| raster_err(path, format!("not a TIFF: {e}")))?
            .with_limits(Limits::unlimited());

        let (width, height) = decoder.dimensions()
            .map_err(|e| raster_err(path, e.to_string()))?;
        match decoder.colortype().map_err(|e| raster_err(path, e.to_string()))? {
            ColorType::Gray(8) | ColorType::Gray(16) => {}
            other => return Err(raster_err(path, format!("expected one 8/16-bit band, found {other:?}")).into()),
        }

        let transform = read_transform(&mut decoder, path)?;
        let nodata = decoder.get_tag_ascii_string(Tag::from_u16_exhaustive(GDAL_NODATA)).ok()
            .and_then(|s| s.trim().trim_end_matches('\0').parse::<f64>().ok())
            .filter(|v| v.fract() == 0.0 && *v >= 0.0 && *v <= f64::from(u16::MAX))
            .map(|v| v as u16);

        let crs = match crs_override {
            Some(code) => Crs::from_epsg(code)?,
            None => read_geokey_crs(&mut decoder, path)?,
        };

        tracing::debug!(
            path = %path.display(), width, height, %crs,
            pixel_width = transform.pixel_width, pixel_height = transform.pixel_height,
            ?nodata, "opened raster"
        );
        Ok(Self {
            decoder,
            width: width as usize,
            height: height as usize,
            transform,
            nodata,
            crs,
            path: path.to_path_buf(),
        })
    }

    /// Ground extent of the whole file.
    pub(crate) fn extent(&self) -> Rect<f64> {
        grid_extent(&self.transform, self.width, self.height)
    }

    /// Pixel range `(c0, c1, r0, r1)` whose footprints meet `area`, or `None`
    /// when `area` misses the grid.
    fn pixel_window(&self, area: &Rect<f64>) -> Option<(usize, usize, usize, usize)> {
        let t = &self.transform;
        let (ca, cb) = (t.col_of(area.min().x), t.col_of(area.max().x));
        let (ra, rb) = (t.row_of(area.min().y), t.row_of(area.max().y));
        let clamp = |v: f64, n: usize| v.clamp(0.0, n as f64) as usize;
        let (c0, c1) = (clamp(ca.min(cb).floor(), self.width), clamp(ca.max(cb).ceil(), self.width));
        let (r0, r1) = (clamp(ra.min(rb).floor(), self.height), clamp(ra.max(rb).ceil(), self.height));
        (c0 < c1 && r0 < r1).then_some((c0, c1, r0, r1))
    }

    /// Decode the pixels under `area`, touching only the strips or tiles that
    /// overlap it. `Ok(None)` when `area` misses the grid.
    pub(crate) fn read_window(mut self, area: &Rect<f64>) -> Result<Option<Raster>> {
        let Some((c0, c1, r0, r1)) = self.pixel_window(area) else { return Ok(None) };
        let path = self.path.clone();
        let (cw, ch) = self.decoder.chunk_dimensions();
        let (cw, ch) = (cw as usize, ch as usize);
        let across = self.width.div_ceil(cw);

        let mut data = Array2::<u16>::zeros((r1 - r0, c1 - c0));
        for cy in r0 / ch..=(r1 - 1) / ch {
            for cx in c0 / cw..=(c1 - 1) / cw {
                let index = (cy * across + cx) as u32;
                let (dw, dh) = self.decoder.chunk_data_dimensions(index);
                let pixels: Vec<u16> = match self.decoder.read_chunk(index).map_err(|e| raster_err(&path, e.to_string()))? {
                    DecodingResult::U8(v) => v.into_iter().map(u16::from).collect(),
                    DecodingResult::U16(v) => v,
                    _ => return Err(raster_err(&path, "unsupported sample format; expected unsigned integers").into()),
                };
                let (dw, dh) = (dw as usize, dh as usize);
                if pixels.len() < dw * dh {
                    return Err(raster_err(&path, format!("chunk {index} is shorter than {dw}x{dh}")).into());
                }

                let (x0, y0) = (cx * cw, cy * ch);
                let (cols_from, cols_to) = (c0.max(x0), c1.min(x0 + dw));
                for row in r0.max(y0)..r1.min(y0 + dh) {
                    let line = &pixels[(row - y0) * dw..][..dw];
                    for col in cols_from..cols_to {
                        data[[row - r0, col - c0]] = line[col - x0];
                    }
                }
            }
        }

        let t = self.transform;
        let transform = GeoTransform {
            origin_x: t.origin_x + c0 as f64 * t.pixel_width,
            origin_y: t.origin_y + r0 as f64 * t.pixel_height,
            ..t
        };
        tracing::debug!(
            path = %path.display(), cols = c1 - c0, rows = r1 - r0, col_offset = c0, row_offset = r0,
            "decoded raster window"
        );
        Ok(Some(Raster {
            data,
            transform,
            nodata: self.nodata,
            crs: self.crs,
            path,
            grid: (self.width, self.height),
        }))
    }
}

fn read_transform<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>, path: &Path) -> Result<GeoTransform> {
    if let Ok(m) = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_TRANSFORMATION)) {
        if m.len() < 8 {
            return Err(raster_err(path, "short ModelTransformation tag").into());
        }
        if m[1] != 0.0 || m[4] != 0.0 {
            return Err(raster_err(path, "rotated rasters are not supported").into());
        }
        return Ok(GeoTransform { origin_x: m[3], pixel_width: m[0], origin_y: m[7], pixel_height: m[5] });
    }

    let scale = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE))
        .map_err(|_| raster_err(path, "no georeferencing (ModelPixelScale/ModelTransformation)"))?;
    let tie = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_TIEPOINT))
        .map_err(|_| raster_err(path, "ModelPixelScale without ModelTiepoint"))?;
    if scale.len() < 2 || tie.len() < 6 {
        return Err(raster_err(path, "malformed ModelPixelScale/ModelTiepoint").into());
    }
    // Tiepoint (i, j, k, x, y, z) maps raster (i, j) to model (x, y).
    let (i, j, x, y) = (tie[0], tie[1], tie[3], tie[4]);
    Ok(GeoTransform {
        origin_x: x - i * scale[0],
        pixel_width: scale[0],
        origin_y: y + j * scale[1],
        pixel_height: -scale[1],
    })
}

fn read_geokey_crs<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>, path: &Path) -> Result<Crs> {
    let keys = decoder.get_tag_u32_vec(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY))
        .map_err(|_| raster_err(path, "no GeoKeyDirectory; set crs.raster in the config"))?;
    let code = geokey_epsg(&keys)
        .ok_or_else(|| raster_err(path, "GeoKeyDirectory has no EPSG code; set crs.raster in the config"))?;
    Ok(Crs::from_epsg(code)?)
}

/// EPSG code from a GeoKey directory, projected key first.
fn geokey_epsg(keys: &[u32]) -> Option<u32> {
    // Header is 4 shorts, then (key, location, count, value) entries.
    let entries: Vec<&[u32]> = keys.get(4..)?.chunks_exact(4).collect();
    let inline = |wanted: u32| entries.iter()
        .find(|e| e[0] == wanted && e[1] == 0)
        .map(|e| e[3])
        .filter(|&code| code != 0 && code != USER_DEFINED);
    inline(PROJECTED_CS_TYPE_KEY).or_else(|| inline(GEOGRAPHIC_TYPE_KEY))
}
