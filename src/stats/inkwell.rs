use std::collections::BTreeMap;

use super::Blob;

/// Category label to samples, one sample per contributing blob.
pub type Table = BTreeMap<String, Vec<f64>>;

/// Static analytics over a full epoch of blobs.
pub struct InkWell;

impl InkWell {
    /// First visits per tile texture, keyed `unique_<tex>`.
    pub fn unique(blobs: &[Blob]) -> Table {
        let mut tiles = Table::new();
        for blob in blobs {
            for (tex, &v) in blob.unique() {
                tiles.entry(format!("unique_{tex}")).or_default().push(v as f64);
            }
        }

        tiles
    }

    /// Visits per tile texture, keyed `counts_<tex>`.
    pub fn counts(blobs: &[Blob]) -> Table {
        let mut tiles = Table::new();
        for blob in blobs {
            for (tex, &v) in blob.counts() {
                tiles.entry(format!("counts_{tex}")).or_default().push(v as f64);
            }
        }

        tiles
    }

    /// Fraction of first visits per tile texture, keyed `explore_<tex>`.
    ///
    /// Textures a blob never visited contribute nothing: zero totals are
    /// dropped, not zero filled.
    pub fn explore(blobs: &[Blob]) -> Table {
        let mut tiles = Table::new();
        for blob in blobs {
            for (tex, &total) in blob.counts() {
                if total == 0 {
                    continue;
                }

                let unique = blob.unique().get(tex).copied().unwrap_or(0);
                tiles
                    .entry(format!("explore_{tex}"))
                    .or_default()
                    .push(unique as f64 / total as f64);
            }
        }

        tiles
    }

    pub fn lifetime(blobs: &[Blob]) -> Table {
        let samples = blobs.iter().map(|blob| blob.lifetime() as f64).collect();
        Table::from([("lifetime".to_string(), samples)])
    }

    pub fn reward(blobs: &[Blob]) -> Table {
        let samples = blobs.iter().flat_map(|blob| blob.reward().iter().copied()).collect();
        Table::from([("reward".to_string(), samples)])
    }

    pub fn value(blobs: &[Blob]) -> Table {
        let samples = blobs.iter().flat_map(|blob| blob.value().iter().copied()).collect();
        Table::from([("value".to_string(), samples)])
    }
}
