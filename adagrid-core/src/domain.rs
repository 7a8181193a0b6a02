use std::{collections::BTreeSet, fmt, ops::Range};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("attribute {name} has cardinality 0")]
    EmptyAttribute { name: String },
    #[error("attribute {name} appears more than once in the domain")]
    DuplicateAttribute { name: String },
    #[error("unknown attribute {name}")]
    UnknownAttribute { name: String },
    #[error("target {name} is not an attribute of the domain")]
    UnknownTarget { name: String },
    #[error("column {name} is in the domain but not in the dataset")]
    MissingColumn { name: String },
    #[error("row {row} has {found} cells, expected {expected}")]
    RowWidth {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("value {value} in column {column} (row {row}) is outside [0, {cardinality})")]
    OutOfRange {
        column: String,
        row: usize,
        value: usize,
        cardinality: usize,
    },
    #[error("malformed domain: {0}")]
    Malformed(String),
}

/// Order-preserving map from an attribute's original values onto coarser bins.
///
/// Bins are contiguous runs of original values, numbered left to right.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition {
    map: Vec<usize>,
    bins: usize,
}

impl Partition {
    pub fn identity(cardinality: usize) -> Self {
        Self {
            map: (0..cardinality).collect(),
            bins: cardinality,
        }
    }

    pub fn from_map(map: Vec<usize>) -> Result<Self, SchemaError> {
        let mut expected = 0usize;
        for (value, &bin) in map.iter().enumerate() {
            let ok = if value == 0 {
                bin == 0
            } else {
                bin == expected || bin == expected + 1
            };
            if !ok {
                return Err(SchemaError::Malformed(format!(
                    "partition is not order-preserving and surjective at value {value}"
                )));
            }
            expected = bin;
        }
        let bins = map.last().map_or(0, |last| last + 1);
        Ok(Self { map, bins })
    }

    pub fn bin_of(&self, value: usize) -> usize {
        self.map[value]
    }

    pub fn num_bins(&self) -> usize {
        self.bins
    }

    pub fn original_size(&self) -> usize {
        self.map.len()
    }

    pub fn map(&self) -> &[usize] {
        &self.map
    }

    pub fn is_collapsed(&self) -> bool {
        self.bins <= 1
    }

    /// Original values covered by `bin`.
    pub fn members(&self, bin: usize) -> Range<usize> {
        let start = self.map.partition_point(|&b| b < bin);
        let end = self.map.partition_point(|&b| b <= bin);
        start..end
    }

    pub fn widths(&self) -> Vec<usize> {
        let mut widths = vec![0usize; self.bins];
        for &bin in &self.map {
            widths[bin] += 1;
        }
        widths
    }

    /// Builds the partition obtained by fusing runs of current bins. `groups`
    /// must tile `0..num_bins()` in order.
    pub fn merge(&self, groups: &[Range<usize>]) -> Self {
        let mut fused = vec![0usize; self.bins];
        for (new_bin, group) in groups.iter().enumerate() {
            for old in group.clone() {
                fused[old] = new_bin;
            }
        }
        Self {
            map: self.map.iter().map(|&bin| fused[bin]).collect(),
            bins: groups.len(),
        }
    }

    /// True when every bin of `finer` lies inside a single bin of `self`.
    pub fn is_coarsening_of(&self, finer: &Partition) -> bool {
        if self.map.len() != finer.map.len() {
            return false;
        }
        let mut image = vec![None; finer.bins];
        for (coarse, fine) in self.map.iter().zip(&finer.map) {
            match image[*fine] {
                None => image[*fine] = Some(*coarse),
                Some(existing) if existing != *coarse => return false,
                Some(_) => {}
            }
        }
        true
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    /// Fine-grained domain size; never changes after construction.
    pub cardinality: usize,
    pub partition: Partition,
}

impl Attribute {
    pub fn current_cardinality(&self) -> usize {
        self.partition.num_bins()
    }
}

/// Ordered attribute schema with the current coarsening of every attribute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    attributes: Vec<Attribute>,
}

impl Domain {
    pub fn new<I, S>(pairs: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        let mut seen = BTreeSet::new();
        let mut attributes = Vec::new();
        for (name, cardinality) in pairs {
            let name = name.into();
            if cardinality == 0 {
                return Err(SchemaError::EmptyAttribute { name });
            }
            if !seen.insert(name.clone()) {
                return Err(SchemaError::DuplicateAttribute { name });
            }
            attributes.push(Attribute {
                name,
                cardinality,
                partition: Partition::identity(cardinality),
            });
        }
        Ok(Self { attributes })
    }

    /// Parses a `{"attr": cardinality, ...}` document, keeping key order.
    pub fn from_json(text: &str) -> Result<Self, SchemaError> {
        let map: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(text).map_err(|err| SchemaError::Malformed(err.to_string()))?;
        let mut pairs = Vec::with_capacity(map.len());
        for (name, value) in map {
            let cardinality = value.as_u64().ok_or_else(|| {
                SchemaError::Malformed(format!("cardinality of {name} is not a non-negative integer"))
            })?;
            pairs.push((name, cardinality as usize));
        }
        Self::new(pairs)
    }

    /// Inverse of [`Domain::from_json`]; partitions are not included.
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .attributes
            .iter()
            .map(|attr| (attr.name.clone(), attr.cardinality.into()))
            .collect();
        serde_json::Value::Object(map)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|attr| attr.name.as_str())
    }

    pub fn index_of(&self, name: &str) -> Result<usize, SchemaError> {
        self.attributes
            .iter()
            .position(|attr| attr.name == name)
            .ok_or_else(|| SchemaError::UnknownAttribute {
                name: name.to_string(),
            })
    }

    pub fn attribute(&self, name: &str) -> Result<&Attribute, SchemaError> {
        Ok(&self.attributes[self.index_of(name)?])
    }

    pub fn partition(&self, name: &str) -> Result<&Partition, SchemaError> {
        Ok(&self.attribute(name)?.partition)
    }

    /// Current (coarsened) cardinality.
    pub fn cardinality(&self, name: &str) -> Result<usize, SchemaError> {
        Ok(self.attribute(name)?.current_cardinality())
    }

    pub fn is_collapsed(&self, name: &str) -> Result<bool, SchemaError> {
        Ok(self.partition(name)?.is_collapsed())
    }

    /// Number of cells of `marginal` over current bins; `None` on overflow.
    pub fn cells(&self, marginal: &Marginal) -> Result<Option<usize>, SchemaError> {
        let mut cells = 1usize;
        for name in marginal.attributes() {
            match cells.checked_mul(self.cardinality(name)?) {
                Some(next) => cells = next,
                None => return Ok(None),
            }
        }
        Ok(Some(cells))
    }

    pub fn check_targets(&self, targets: &[String]) -> Result<(), SchemaError> {
        for target in targets {
            if self.index_of(target).is_err() {
                return Err(SchemaError::UnknownTarget {
                    name: target.clone(),
                });
            }
        }
        Ok(())
    }

    /// Swaps in a coarser partition. Only the grid adapter calls this.
    pub(crate) fn replace_partition(&mut self, index: usize, partition: Partition) {
        debug_assert!(partition.is_coarsening_of(&self.attributes[index].partition));
        self.attributes[index].partition = partition;
    }
}

/// A duplicate-free attribute set, stored sorted so identity ignores order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Marginal(Vec<String>);

impl Marginal {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        Self(set.into_iter().collect())
    }

    pub fn attributes(&self) -> &[String] {
        &self.0
    }

    pub fn order(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|attr| attr == name)
    }

    pub fn touches(&self, targets: &[String]) -> bool {
        targets.iter().any(|target| self.contains(target))
    }
}

impl fmt::Display for Marginal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0.join(","))
    }
}

/// Raw integer-coded table as read from or written to disk.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<usize>>,
}

/// A table validated against a domain, stored column-major in domain order.
#[derive(Clone, Debug)]
pub struct Dataset {
    domain: Domain,
    columns: Vec<Vec<usize>>,
    records: usize,
}

impl Dataset {
    pub fn new(domain: Domain, table: &Table) -> Result<Self, SchemaError> {
        let positions = domain
            .names()
            .map(|name| {
                table
                    .columns
                    .iter()
                    .position(|column| column == name)
                    .ok_or_else(|| SchemaError::MissingColumn {
                        name: name.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut columns = vec![Vec::with_capacity(table.rows.len()); domain.len()];
        for (row_index, row) in table.rows.iter().enumerate() {
            if row.len() != table.columns.len() {
                return Err(SchemaError::RowWidth {
                    row: row_index,
                    found: row.len(),
                    expected: table.columns.len(),
                });
            }
            for (attr_index, &position) in positions.iter().enumerate() {
                let attr = &domain.attributes[attr_index];
                let value = row[position];
                if value >= attr.cardinality {
                    return Err(SchemaError::OutOfRange {
                        column: attr.name.clone(),
                        row: row_index,
                        value,
                        cardinality: attr.cardinality,
                    });
                }
                columns[attr_index].push(value);
            }
        }
        Ok(Self {
            domain,
            columns,
            records: table.rows.len(),
        })
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn column(&self, name: &str) -> Result<&[usize], SchemaError> {
        Ok(&self.columns[self.domain.index_of(name)?])
    }

    /// Histogram of `marginal` over the bins of `partitions` (the current
    /// coarsening), row-major with the last attribute varying fastest.
    pub fn project(&self, marginal: &Marginal, partitions: &Domain) -> Result<Vec<f64>, SchemaError> {
        let mut sources = Vec::with_capacity(marginal.order());
        for name in marginal.attributes() {
            sources.push((self.column(name)?, partitions.partition(name)?));
        }
        let cells = sources
            .iter()
            .try_fold(1usize, |acc, (_, partition)| acc.checked_mul(partition.num_bins()))
            .ok_or_else(|| SchemaError::Malformed(format!("marginal {marginal} is too large")))?;
        let mut counts = vec![0.0; cells];
        for record in 0..self.records {
            let mut index = 0usize;
            for (column, partition) in &sources {
                index = index * partition.num_bins() + partition.bin_of(column[record]);
            }
            counts[index] += 1.0;
        }
        Ok(counts)
    }

    pub fn to_table(&self) -> Table {
        Table {
            columns: self.domain.names().map(str::to_string).collect(),
            rows: (0..self.records)
                .map(|record| self.columns.iter().map(|column| column[record]).collect())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: Vec<Vec<usize>>) -> Table {
        Table {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    #[test]
    fn marginal_identity_ignores_order() {
        assert_eq!(Marginal::new(["B", "A"]), Marginal::new(["A", "B"]));
        assert_eq!(Marginal::new(["A", "A"]).order(), 1);
    }

    #[test]
    fn domain_json_keeps_declared_order() {
        let domain = Domain::from_json(r#"{"zeta": 3, "alpha": 2}"#).unwrap();
        assert_eq!(domain.names().collect::<Vec<_>>(), vec!["zeta", "alpha"]);
        assert_eq!(domain.attribute("zeta").unwrap().cardinality, 3);
    }

    #[test]
    fn rejects_zero_cardinality_and_duplicates() {
        assert!(matches!(
            Domain::new([("a", 0)]),
            Err(SchemaError::EmptyAttribute { .. })
        ));
        assert!(matches!(
            Domain::new([("a", 2), ("a", 3)]),
            Err(SchemaError::DuplicateAttribute { .. })
        ));
    }

    #[test]
    fn dataset_rejects_out_of_range_values() {
        let domain = Domain::new([("x", 2)]).unwrap();
        let err = Dataset::new(domain, &table(&["x"], vec![vec![0], vec![2]])).unwrap_err();
        assert_eq!(
            err,
            SchemaError::OutOfRange {
                column: "x".into(),
                row: 1,
                value: 2,
                cardinality: 2
            }
        );
    }

    #[test]
    fn dataset_requires_every_domain_column() {
        let domain = Domain::new([("x", 2), ("y", 2)]).unwrap();
        let err = Dataset::new(domain, &table(&["x"], vec![vec![0]])).unwrap_err();
        assert!(matches!(err, SchemaError::MissingColumn { name } if name == "y"));
    }

    #[test]
    fn projection_uses_current_bins() {
        let mut domain = Domain::new([("x", 2), ("y", 3)]).unwrap();
        let data = Dataset::new(
            domain.clone(),
            &table(&["y", "x"], vec![vec![0, 0], vec![1, 1], vec![2, 1], vec![2, 0]]),
        )
        .unwrap();
        let joint = data.project(&Marginal::new(["x", "y"]), &domain).unwrap();
        assert_eq!(joint, vec![1.0, 0.0, 1.0, 0.0, 1.0, 1.0]);

        let merged = domain.partition("y").unwrap().merge(&[0..1, 1..3]);
        let index = domain.index_of("y").unwrap();
        domain.replace_partition(index, merged);
        let coarse = data.project(&Marginal::new(["y"]), &domain).unwrap();
        assert_eq!(coarse, vec![1.0, 3.0]);
    }

    #[test]
    fn merge_only_coarsens() {
        let fine = Partition::identity(5);
        let mid = fine.merge(&[0..2, 2..3, 3..5]);
        let coarse = mid.merge(&[0..2, 2..3]);
        assert_eq!(mid.map(), &[0, 0, 1, 2, 2]);
        assert_eq!(coarse.map(), &[0, 0, 0, 1, 1]);
        assert!(mid.is_coarsening_of(&fine));
        assert!(coarse.is_coarsening_of(&mid));
        assert!(!fine.is_coarsening_of(&mid));
        assert_eq!(coarse.members(1), 3..5);
        assert_eq!(coarse.widths(), vec![3, 2]);
    }

    #[test]
    fn from_map_rejects_gaps() {
        assert!(Partition::from_map(vec![0, 0, 1, 1]).is_ok());
        assert!(Partition::from_map(vec![0, 2]).is_err());
        assert!(Partition::from_map(vec![1, 1]).is_err());
    }
}
