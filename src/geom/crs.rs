use std::{fmt, path::Path, str::FromStr, sync::LazyLock};

use anyhow::{anyhow, Context, Result};
use geo::{Coord, MapCoords, MultiPolygon, Point};
use proj4rs::{proj::Proj as Proj4, transform::transform};
use regex::Regex;

use crate::error::Error;

struct Definition {
    epsg: u32,
    proj4: &'static str,
    geographic: bool,
    /// Name fragments found in ESRI-style `.prj` files that omit AUTHORITY.
    aliases: &'static [&'static str],
}

const REGISTRY: &[Definition] = &[
    Definition {
        epsg: 4326,
        proj4: "+proj=longlat +datum=WGS84 +no_defs",
        geographic: true,
        aliases: &["GCS_WGS_1984", "WGS 84", "WGS_1984"],
    },
    Definition {
        epsg: 4269,
        proj4: "+proj=longlat +datum=NAD83 +no_defs",
        geographic: true,
        aliases: &["GCS_North_American_1983", "NAD83"],
    },
    Definition {
        epsg: 3347,
        proj4: "+proj=lcc +lat_0=63.390675 +lon_0=-91.8666666666667 +lat_1=49 +lat_2=77 +x_0=6200000 +y_0=3000000 +datum=NAD83 +units=m +no_defs",
        geographic: false,
        aliases: &["Statistics_Canada_Lambert", "Statistics Canada Lambert"],
    },
    Definition {
        epsg: 3979,
        proj4: "+proj=lcc +lat_0=49 +lon_0=-95 +lat_1=49 +lat_2=77 +x_0=0 +y_0=0 +datum=NAD83 +units=m +no_defs",
        geographic: false,
        aliases: &["Canada_Atlas_Lambert", "Canada Atlas Lambert"],
    },
    Definition {
        epsg: 3005,
        proj4: "+proj=aea +lat_0=45 +lon_0=-126 +lat_1=50 +lat_2=58.5 +x_0=1000000 +y_0=0 +datum=NAD83 +units=m +no_defs",
        geographic: false,
        aliases: &["BC_Environment_Albers", "BC Albers", "BC_Albers"],
    },
    Definition {
        epsg: 26910,
        proj4: "+proj=utm +zone=10 +datum=NAD83 +units=m +no_defs",
        geographic: false,
        aliases: &["UTM_Zone_10N", "UTM zone 10N"],
    },
];

static AUTHORITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"AUTHORITY\s*\[\s*"EPSG"\s*,\s*"?(\d+)"?\s*\]"#).expect("static regex")
});

static CENTRAL_MERIDIAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)PARAMETER\s*\[\s*"(?:central_meridian|longitude_of_center)"\s*,\s*(-?[\d.]+)\s*\]"#)
        .expect("static regex")
});

/// A coordinate reference system from the supported registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs {
    epsg: u32,
}

impl Crs {
    pub const SUPPORTED: &'static [u32] = &[4326, 4269, 3347, 3979, 3005, 26910];

    pub fn from_epsg(epsg: u32) -> Result<Self, Error> {
        match REGISTRY.iter().any(|def| def.epsg == epsg) {
            true => Ok(Self { epsg }),
            false => Err(Error::UnsupportedCrs(format!("EPSG:{epsg}"))),
        }
    }

    fn definition(&self) -> &'static Definition {
        REGISTRY.iter().find(|def| def.epsg == self.epsg)
            .unwrap_or(&REGISTRY[0]) // constructors only admit registered codes
    }

    #[inline] pub fn epsg(&self) -> u32 { self.epsg }
    #[inline] pub fn proj4(&self) -> &'static str { self.definition().proj4 }
    #[inline] pub fn is_geographic(&self) -> bool { self.definition().geographic }

    /// Identify a CRS from OGC or ESRI WKT.
    ///
    /// The outermost `AUTHORITY["EPSG", ...]` wins when present. Otherwise
    /// the projected names are tried before the geographic ones, then a
    /// Lambert conformal conic is told apart by its central meridian.
    pub fn from_wkt(wkt: &str) -> Result<Self, Error> {
        if let Some(code) = AUTHORITY.captures_iter(wkt).last()
            .and_then(|caps| caps[1].parse::<u32>().ok())
        {
            return Self::from_epsg(code);
        }

        let projected = wkt.trim_start().to_ascii_uppercase().starts_with("PROJCS");
        for def in REGISTRY.iter().filter(|def| def.geographic != projected) {
            if def.aliases.iter().any(|alias| wkt.contains(alias)) {
                return Ok(Self { epsg: def.epsg });
            }
        }

        if projected && wkt.contains("Lambert_Conformal_Conic") {
            let meridian = CENTRAL_MERIDIAN.captures(wkt)
                .and_then(|caps| caps[1].parse::<f64>().ok());
            match meridian {
                Some(m) if (m + 91.866_666_666_666_7).abs() < 1e-6 => return Ok(Self { epsg: 3347 }),
                Some(m) if (m + 95.0).abs() < 1e-6 => return Ok(Self { epsg: 3979 }),
                _ => {}
            }
        }

        let head: String = wkt.chars().take(80).collect();
        Err(Error::UnsupportedCrs(format!("WKT {head:?}")))
    }

    /// Read the `.prj` sidecar of a shapefile, if it exists.
    pub fn from_prj_sidecar(shp: &Path) -> Result<Option<Self>> {
        let prj = shp.with_extension("prj");
        if !prj.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&prj)
            .with_context(|| format!("Failed to read {}", prj.display()))?;
        let wkt = String::from_utf8_lossy(&bytes);
        Ok(Some(Self::from_wkt(&wkt)?))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

impl FromStr for Crs {
    type Err = Error;

    /// Accepts `EPSG:3347`, `epsg:3347` or a bare code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let code = s.get(..5)
            .filter(|prefix| prefix.eq_ignore_ascii_case("EPSG:"))
            .map_or(s, |_| &s[5..]);
        code.trim().parse::<u32>()
            .map_err(|_| Error::UnsupportedCrs(s.to_string()))
            .and_then(Self::from_epsg)
    }
}

/// Point transformer between two registry CRSs.
pub struct Transformer {
    from: Proj4,
    to: Proj4,
    from_geographic: bool,
    to_geographic: bool,
    identity: bool,
}

impl Transformer {
    pub fn new(from: Crs, to: Crs) -> Result<Self> {
        let build = |crs: Crs| Proj4::from_proj_string(crs.proj4())
            .map_err(|e| anyhow!("{e:?}"))
            .with_context(|| format!("failed to build PROJ.4 for {crs}: {}", crs.proj4()));
        Ok(Self {
            from: build(from)?,
            to: build(to)?,
            from_geographic: from.is_geographic(),
            to_geographic: to.is_geographic(),
            identity: from == to,
        })
    }

    /// Degrees in and out for geographic CRSs, metres otherwise.
    pub fn coord(&self, coord: Coord<f64>) -> Result<Coord<f64>> {
        if self.identity {
            return Ok(coord);
        }
        let mut point = match self.from_geographic {
            true => (coord.x.to_radians(), coord.y.to_radians(), 0.0),
            false => (coord.x, coord.y, 0.0),
        };
        transform(&self.from, &self.to, &mut point)
            .map_err(|e| anyhow!("CRS transform failed at ({}, {}): {e:?}", coord.x, coord.y))?;
        Ok(match self.to_geographic {
            true => Coord { x: point.0.to_degrees(), y: point.1.to_degrees() },
            false => Coord { x: point.0, y: point.1 },
        })
    }

    pub fn point(&self, point: Point<f64>) -> Result<Point<f64>> {
        self.coord(point.0).map(Point)
    }

    pub fn multi_polygon(&self, shape: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        if self.identity {
            return Ok(shape.clone());
        }
        shape.try_map_coords(|coord| self.coord(coord))
    }
}
