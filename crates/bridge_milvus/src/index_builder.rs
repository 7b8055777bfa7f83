use derive_setters::Setters;

use crate::MetricType;
use crate::entity::IndexParams;

/// Produces the index created on the dense vector field.
pub trait IndexBuilder: Send + Sync {
    fn build(&self, metric_type: MetricType) -> IndexParams;
}

/// Produces the index created on the sparse vector field.
pub trait SparseIndexBuilder: Send + Sync {
    fn build(&self, metric_type: MetricType) -> IndexParams;
}

macro_rules! plain_index {
    ($($(#[$meta:meta])* $name:ident => $index_type:literal),* $(,)?) => {$(
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq)]
        pub struct $name;

        impl IndexBuilder for $name {
            fn build(&self, metric_type: MetricType) -> IndexParams {
                IndexParams::new($index_type, metric_type)
            }
        }
    )*};
}

plain_index! {
    /// Lets Milvus pick the index type.
    AutoIndexBuilder => "AUTOINDEX",
    /// Brute force search with exact recall.
    FlatIndexBuilder => "FLAT",
    DiskAnnIndexBuilder => "DISKANN",
    BinFlatIndexBuilder => "BIN_FLAT",
    GpuBruteForceIndexBuilder => "GPU_BRUTE_FORCE",
    GpuIvfFlatIndexBuilder => "GPU_IVF_FLAT",
    GpuIvfPqIndexBuilder => "GPU_IVF_PQ",
}

/// Graph based index. `m` is the maximum node degree and `ef_construction`
/// the search width while building.
#[derive(Debug, Clone, Copy, PartialEq, Setters)]
#[setters(prefix = "with_")]
pub struct HnswIndexBuilder {
    pub m: usize,
    pub ef_construction: usize,
}

impl Default for HnswIndexBuilder {
    fn default() -> Self {
        Self { m: 16, ef_construction: 200 }
    }
}

impl IndexBuilder for HnswIndexBuilder {
    fn build(&self, metric_type: MetricType) -> IndexParams {
        IndexParams::new("HNSW", metric_type)
            .param("M", self.m)
            .param("efConstruction", self.ef_construction)
    }
}

/// Builders whose only knob is the number of clusters.
macro_rules! nlist_index {
    ($($name:ident => $index_type:literal),* $(,)?) => {$(
        #[derive(Debug, Clone, Copy, PartialEq, Setters)]
        #[setters(prefix = "with_")]
        pub struct $name {
            pub nlist: usize,
        }

        impl Default for $name {
            fn default() -> Self {
                Self { nlist: 128 }
            }
        }

        impl IndexBuilder for $name {
            fn build(&self, metric_type: MetricType) -> IndexParams {
                IndexParams::new($index_type, metric_type).param("nlist", self.nlist)
            }
        }
    )*};
}

nlist_index! {
    IvfFlatIndexBuilder => "IVF_FLAT",
    IvfSq8IndexBuilder => "IVF_SQ8",
    BinIvfFlatIndexBuilder => "BIN_IVF_FLAT",
    IvfRabitQIndexBuilder => "IVF_RABITQ",
}

/// IVF with product quantization: `m` sub-quantizers of `nbits` bits each.
#[derive(Debug, Clone, Copy, PartialEq, Setters)]
#[setters(prefix = "with_")]
pub struct IvfPqIndexBuilder {
    pub nlist: usize,
    pub m: usize,
    pub nbits: usize,
}

impl Default for IvfPqIndexBuilder {
    fn default() -> Self {
        Self { nlist: 128, m: 16, nbits: 8 }
    }
}

impl IndexBuilder for IvfPqIndexBuilder {
    fn build(&self, metric_type: MetricType) -> IndexParams {
        IndexParams::new("IVF_PQ", metric_type)
            .param("nlist", self.nlist)
            .param("m", self.m)
            .param("nbits", self.nbits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Setters)]
#[setters(prefix = "with_")]
pub struct ScannIndexBuilder {
    pub nlist: usize,
    /// Keep raw vectors for reranking.
    pub raw_data: bool,
}

impl Default for ScannIndexBuilder {
    fn default() -> Self {
        Self { nlist: 128, raw_data: true }
    }
}

impl IndexBuilder for ScannIndexBuilder {
    fn build(&self, metric_type: MetricType) -> IndexParams {
        IndexParams::new("SCANN", metric_type)
            .param("nlist", self.nlist)
            .param("with_raw_data", self.raw_data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Setters)]
#[setters(prefix = "with_")]
pub struct GpuCagraIndexBuilder {
    pub intermediate_graph_degree: usize,
    pub graph_degree: usize,
}

impl Default for GpuCagraIndexBuilder {
    fn default() -> Self {
        Self { intermediate_graph_degree: 128, graph_degree: 64 }
    }
}

impl IndexBuilder for GpuCagraIndexBuilder {
    fn build(&self, metric_type: MetricType) -> IndexParams {
        IndexParams::new("GPU_CAGRA", metric_type)
            .param("intermediate_graph_degree", self.intermediate_graph_degree)
            .param("graph_degree", self.graph_degree)
    }
}

macro_rules! sparse_index {
    ($($name:ident => $index_type:literal),* $(,)?) => {$(
        /// `drop_ratio_build` is the share of small values dropped while building.
        #[derive(Debug, Clone, Copy, PartialEq, Setters)]
        #[setters(prefix = "with_")]
        pub struct $name {
            pub drop_ratio_build: f64,
        }

        impl Default for $name {
            fn default() -> Self {
                Self { drop_ratio_build: 0.2 }
            }
        }

        impl SparseIndexBuilder for $name {
            fn build(&self, metric_type: MetricType) -> IndexParams {
                IndexParams::new($index_type, metric_type)
                    .param("drop_ratio_build", self.drop_ratio_build)
            }
        }
    )*};
}

sparse_index! {
    SparseInvertedIndexBuilder => "SPARSE_INVERTED_INDEX",
    SparseWandIndexBuilder => "SPARSE_WAND",
}
