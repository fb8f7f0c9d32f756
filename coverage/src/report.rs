// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::block::{BlockRecord, Count, Uid};
use crate::ledger::Ledger;

/// Hit counts of every registered block, keyed by goal (property name).
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CoverageReport {
    pub goals: Vec<GoalCoverage>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalCoverage {
    #[serde(rename = "goalID")]
    pub goal_id: String,

    pub hit_count: u64,

    pub covered_lines: Vec<CoveredLine>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoveredLine {
    pub line_number: u32,
}

impl CoverageReport {
    /// Build a report in UID order. Blocks without a counter have zero hits.
    pub fn new(records: &[BlockRecord], counts: &BTreeMap<Uid, Count>) -> Self {
        let mut records: Vec<&BlockRecord> = records.iter().collect();
        records.sort_by_key(|record| record.uid);

        let goals = records
            .into_iter()
            .map(|record| GoalCoverage {
                goal_id: record.name.clone(),
                hit_count: counts.get(&record.uid).copied().unwrap_or_default().0,
                covered_lines: record
                    .lines
                    .iter()
                    .map(|&line_number| CoveredLine { line_number })
                    .collect(),
            })
            .collect();

        Self { goals }
    }

    pub fn generate(ledger: &Ledger) -> Result<Self> {
        let records = ledger.records()?;
        let counts = ledger.hit_counts()?;

        Ok(Self::new(&records, &counts))
    }

    /// Order goals by ID, for comparing reports.
    pub fn sorted(mut self) -> Self {
        self.goals.sort_by(|a, b| a.goal_id.cmp(&b.goal_id));
        self
    }

    pub fn hit_count(&self, goal_id: &str) -> Option<u64> {
        self.goals
            .iter()
            .find(|goal| goal.goal_id == goal_id)
            .map(|goal| goal.hit_count)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// One line per reached block, `<identity> <n> times`, and one per unreached
/// block, `<identity> is uncovered`, if `uncovered` is set.
pub fn summary(
    records: &[BlockRecord],
    counts: &BTreeMap<Uid, Count>,
    uncovered: bool,
) -> Vec<String> {
    let mut lines = vec![];

    for record in records {
        let count = counts.get(&record.uid).copied().unwrap_or_default();

        if count.reached() {
            lines.push(format!("{} {} times", record.description, count.0));
        } else if uncovered {
            lines.push(format!("{} is uncovered", record.description));
        }
    }

    lines
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use bytecode::Offset;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn record(uid: u32, name: &str, offset: u32, lines: &[u32]) -> BlockRecord {
        BlockRecord {
            uid: Uid(uid),
            description: format!("pkg/Sample.choose:(I)I@{offset}"),
            name: name.into(),
            unit: "pkg/Sample".into(),
            method: "choose:(I)I".into(),
            offset: Offset(offset),
            lines: lines.iter().copied().collect::<BTreeSet<_>>(),
        }
    }

    fn fixture() -> (Vec<BlockRecord>, BTreeMap<Uid, Count>) {
        let records = vec![
            record(1, "goal-b", 4, &[5]),
            record(0, "goal-c", 2, &[3, 4]),
            record(2, "goal-a", 6, &[]),
        ];
        let counts = BTreeMap::from([(Uid(0), Count(2)), (Uid(2), Count(0))]);

        (records, counts)
    }

    #[test]
    fn test_report_json() -> Result<()> {
        let (records, counts) = fixture();
        let report = CoverageReport::new(&records, &counts);

        let expected = json!([
            {
                "goalID": "goal-c",
                "hitCount": 2,
                "coveredLines": [{ "lineNumber": 3 }, { "lineNumber": 4 }]
            },
            {
                "goalID": "goal-b",
                "hitCount": 0,
                "coveredLines": [{ "lineNumber": 5 }]
            },
            {
                "goalID": "goal-a",
                "hitCount": 0,
                "coveredLines": []
            }
        ]);

        assert_eq!(serde_json::to_value(&report)?, expected);

        let parsed: CoverageReport = serde_json::from_str(&report.to_json()?)?;
        assert_eq!(parsed, report);

        Ok(())
    }

    #[test]
    fn test_sorted() {
        let (records, counts) = fixture();
        let report = CoverageReport::new(&records, &counts).sorted();

        let ids: Vec<_> = report.goals.iter().map(|g| g.goal_id.as_str()).collect();
        assert_eq!(ids, vec!["goal-a", "goal-b", "goal-c"]);
        assert_eq!(report.hit_count("goal-c"), Some(2));
        assert_eq!(report.hit_count("goal-z"), None);
    }

    #[test]
    fn test_summary() {
        let (records, counts) = fixture();

        assert_eq!(
            summary(&records, &counts, false),
            vec!["pkg/Sample.choose:(I)I@2 2 times"]
        );

        assert_eq!(
            summary(&records, &counts, true),
            vec![
                "pkg/Sample.choose:(I)I@4 is uncovered",
                "pkg/Sample.choose:(I)I@2 2 times",
                "pkg/Sample.choose:(I)I@6 is uncovered",
            ]
        );
    }
}
