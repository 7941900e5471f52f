use merge_tree::{
    write_part, ColumnKind, ColumnSchema, Field, MergeMode, MergeSettings, PartEnvelope,
    PartRegistry, Row, SortOrder, TableSchema,
};
use std::sync::Arc;
use test_log::test;

fn schema() -> TableSchema {
    TableSchema {
        columns: vec![ColumnSchema {
            name: "id".into(),
            kind: ColumnKind::UInt,
        }],
        primary_key: vec![("id".into(), SortOrder::Ascending)],
        mode: MergeMode::Ordinary,
    }
}

fn insert_batch(
    registry: &PartRegistry,
    schema: &TableSchema,
    settings: &MergeSettings,
    rows: Vec<Row>,
) -> merge_tree::Result<()> {
    let block_id = registry.next_block_id();
    let date = chrono::NaiveDate::from_ymd_opt(2023, 1, 1).expect("valid date");

    let part = write_part(
        registry.path(),
        schema.sort_description()?,
        settings.index_granularity,
        PartEnvelope {
            min_date: date,
            max_date: date,
            min_block_id: block_id,
            max_block_id: block_id,
            level: 0,
        },
        rows,
    )?;

    registry.add_part(part)?;

    Ok(())
}

#[test]
fn recover_restores_the_part_set() -> merge_tree::Result<()> {
    let folder = tempfile::tempdir()?;

    let schema = schema();
    let settings = MergeSettings::default().index_granularity(4);

    let names = {
        let registry = PartRegistry::create_new(folder.path())?;

        for batch in 0..3 {
            insert_batch(
                &registry,
                &schema,
                &settings,
                (batch * 10..(batch + 1) * 10)
                    .map(|i| Row(vec![Field::UInt(i)]))
                    .collect(),
            )?;
        }

        registry
            .snapshot()
            .iter()
            .map(|p| p.name.clone())
            .collect::<Vec<_>>()
    };

    let recovered = PartRegistry::recover(folder.path())?;

    let recovered_names: Vec<Arc<str>> =
        recovered.snapshot().iter().map(|p| p.name.clone()).collect();
    assert_eq!(names, recovered_names);

    // Primary indexes were loaded back from disk
    assert!(recovered
        .snapshot()
        .iter()
        .all(|p| p.primary_index.len() as u64 == p.size_in_marks));

    // Block id allocation continues after the recovered maximum
    assert_eq!(4, recovered.next_block_id());

    Ok(())
}

#[test]
fn recover_removes_orphaned_staging_dirs() -> merge_tree::Result<()> {
    let folder = tempfile::tempdir()?;

    let schema = schema();
    let settings = MergeSettings::default().index_granularity(4);

    {
        let registry = PartRegistry::create_new(folder.path())?;
        insert_batch(
            &registry,
            &schema,
            &settings,
            vec![Row(vec![Field::UInt(1)])],
        )?;
    }

    // A crash mid-merge leaves a tmp_ directory behind
    let orphan = folder.path().join("tmp_20230101_20230101_9_9_1");
    std::fs::create_dir_all(&orphan)?;
    std::fs::write(orphan.join("blocks"), b"partial")?;

    let recovered = PartRegistry::recover(folder.path())?;

    assert_eq!(1, recovered.len());
    assert!(!orphan.exists());

    Ok(())
}
