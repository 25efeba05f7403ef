use crate::model::{AnnotationRecord, EvidenceRecord, Gene};
use crate::store::curation::CurationRow;
use crate::store::run::PipelineRun;
use redb::TableDefinition;

/// Implements `redb::Value` for a serde type, stored as JSON bytes. One
/// macro instead of a hand-written impl per row type; the store carries
/// eight of them.
#[macro_export]
macro_rules! json_table_value {
    ($row:ty) => {
        impl redb::Value for $row {
            type SelfType<'a> = $row;
            type AsBytes<'a> = Vec<u8>;

            fn fixed_width() -> Option<usize> {
                None
            }

            fn from_bytes<'a>(data: &'a [u8]) -> Self::SelfType<'a>
            where
                Self: 'a,
            {
                serde_json::from_slice(data).expect("corrupt row")
            }

            fn as_bytes<'a, 'b: 'a>(value: &'a Self::SelfType<'b>) -> Self::AsBytes<'a>
            where
                Self: 'b,
            {
                serde_json::to_vec(value).unwrap()
            }

            fn type_name() -> redb::TypeName {
                redb::TypeName::new(
                    std::any::type_name::<$row>().split("::").last().unwrap(),
                )
            }
        }
    };
}

json_table_value!(Gene);
json_table_value!(EvidenceRecord);
json_table_value!(AnnotationRecord);
json_table_value!(CurationRow);
json_table_value!(PipelineRun);

pub const GENES: TableDefinition<u64, Gene> = TableDefinition::new("genes");
/// Approved symbol (uppercase) to gene id.
pub const GENE_SYMBOLS: TableDefinition<&str, u64> = TableDefinition::new("gene_symbols");
/// HGNC identifier to gene id.
pub const GENE_HGNC: TableDefinition<&str, u64> = TableDefinition::new("gene_hgnc_ids");
/// Keyed `"{gene_id}:{source}"`; the composite key is the unique index
/// enforcing one evidence record per (gene, source).
pub const GENE_EVIDENCE: TableDefinition<&str, EvidenceRecord> =
    TableDefinition::new("gene_evidence");
pub const GENE_ANNOTATIONS: TableDefinition<&str, AnnotationRecord> =
    TableDefinition::new("gene_annotations");
pub const GENE_CURATIONS: TableDefinition<u64, CurationRow> =
    TableDefinition::new("gene_curations");
pub const PIPELINE_RUNS: TableDefinition<u64, PipelineRun> = TableDefinition::new("pipeline_runs");
/// Monotonic counters: gene ids, run ids, normalization log ids.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

pub fn evidence_key(gene_id: u64, source: &str) -> String {
    format!("{gene_id}:{source}")
}

/// Bounds covering every per-source row of one gene.
pub fn gene_bounds(gene_id: u64) -> (String, String) {
    (format!("{gene_id}:"), format!("{gene_id};"))
}
