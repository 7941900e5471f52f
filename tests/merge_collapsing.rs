use merge_tree::{
    write_part, ActiveMerges, CancelToken, ColumnKind, ColumnSchema, DiskBudget, Field,
    MergeCandidate, MergeExecutor, MergeMode, MergeOutcome, MergeSettings, PartEnvelope, PartInfo,
    PartReader, PartRegistry, Row, SortOrder, TableSchema,
};
use std::{path::Path, sync::Arc};
use test_log::test;

fn schema() -> Arc<TableSchema> {
    Arc::new(TableSchema {
        columns: vec![
            ColumnSchema {
                name: "id".into(),
                kind: ColumnKind::UInt,
            },
            ColumnSchema {
                name: "sign".into(),
                kind: ColumnKind::Int,
            },
        ],
        primary_key: vec![("id".into(), SortOrder::Ascending)],
        mode: MergeMode::Collapsing {
            sign_column: "sign".into(),
        },
    })
}

fn executor(
    path: &Path,
    schema: Arc<TableSchema>,
    settings: MergeSettings,
    registry: Arc<PartRegistry>,
) -> MergeExecutor {
    MergeExecutor {
        path: path.into(),
        schema,
        settings,
        registry,
        disk: Arc::new(DiskBudget::new(Box::new(|| u64::MAX))),
        cancel: CancelToken::default(),
        active: Arc::new(ActiveMerges::new()),
    }
}

fn insert_batch(
    registry: &PartRegistry,
    schema: &TableSchema,
    settings: &MergeSettings,
    rows: Vec<Row>,
) -> merge_tree::Result<Arc<PartInfo>> {
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

    registry.add_part(part)
}

fn read_all_rows(registry: &PartRegistry) -> merge_tree::Result<Vec<Row>> {
    let mut rows = vec![];

    for part in registry.snapshot() {
        let reader = PartReader::open(registry.path().join(&*part.name))?;

        for block in reader.read_range(0..reader.marks_count())? {
            rows.extend(block?.rows);
        }
    }

    Ok(rows)
}

fn row(id: u64, sign: i64) -> Row {
    Row(vec![Field::UInt(id), Field::Int(sign)])
}

fn sign_sum_per_key(rows: &[Row], id: u64) -> i64 {
    rows.iter()
        .filter(|r| r[0] == Field::UInt(id))
        .map(|r| match r[1] {
            Field::Int(sign) => sign,
            _ => unreachable!(),
        })
        .sum()
}

#[test]
fn surplus_survives_balanced_rows_annihilate() -> merge_tree::Result<()> {
    let folder = tempfile::tempdir()?;

    let schema = schema();
    let settings = MergeSettings::default().index_granularity(4);
    let registry = Arc::new(PartRegistry::create_new(folder.path())?);

    // Key 1: +1 +1 then -1 => one +1 row. Key 2: +1 then -1 => gone.
    insert_batch(
        &registry,
        &schema,
        &settings,
        vec![row(1, 1), row(1, 1), row(2, 1)],
    )?;
    insert_batch(&registry, &schema, &settings, vec![row(1, -1), row(2, -1)])?;

    let input_rows = read_all_rows(&registry)?;
    let input_sign_key1 = sign_sum_per_key(&input_rows, 1);
    let input_sign_key2 = sign_sum_per_key(&input_rows, 2);

    let snapshot = registry.snapshot();
    let executor = executor(folder.path(), schema, settings, registry.clone());

    let outcome = executor.merge(&MergeCandidate { parts: snapshot })?;
    assert!(matches!(outcome, MergeOutcome::Merged(_)));

    let rows = read_all_rows(&registry)?;

    assert_eq!(vec![row(1, 1)], rows);

    // The sign sum per key is preserved
    assert_eq!(input_sign_key1, sign_sum_per_key(&rows, 1));
    assert_eq!(input_sign_key2, sign_sum_per_key(&rows, 2));

    Ok(())
}

#[test]
fn fully_balanced_merge_produces_no_part() -> merge_tree::Result<()> {
    let folder = tempfile::tempdir()?;

    let schema = schema();
    let settings = MergeSettings::default().index_granularity(4);
    let registry = Arc::new(PartRegistry::create_new(folder.path())?);

    let a = insert_batch(&registry, &schema, &settings, vec![row(1, 1)])?;
    let b = insert_batch(&registry, &schema, &settings, vec![row(1, -1)])?;

    let executor = executor(folder.path(), schema, settings, registry.clone());

    let outcome = executor.merge(&MergeCandidate {
        parts: vec![a.clone(), b.clone()],
    })?;

    // Everything annihilated: valid outcome, but no replacement happens
    assert_eq!(MergeOutcome::Nothing, outcome);
    assert_eq!(2, registry.len());
    assert!(folder.path().join(&*a.name).exists());
    assert!(folder.path().join(&*b.name).exists());

    // No staging directory left behind
    for dir_entry in std::fs::read_dir(folder.path())? {
        let name = dir_entry?.file_name();
        assert!(!name.to_string_lossy().starts_with("tmp_"));
    }

    Ok(())
}

#[test]
fn row_count_never_grows() -> merge_tree::Result<()> {
    let folder = tempfile::tempdir()?;

    let schema = schema();
    let settings = MergeSettings::default().index_granularity(4);
    let registry = Arc::new(PartRegistry::create_new(folder.path())?);

    insert_batch(
        &registry,
        &schema,
        &settings,
        (0..20).map(|i| row(i, 1)).collect(),
    )?;
    insert_batch(
        &registry,
        &schema,
        &settings,
        (5..15).map(|i| row(i, -1)).collect(),
    )?;

    let input_count = read_all_rows(&registry)?.len();

    let snapshot = registry.snapshot();
    let executor = executor(folder.path(), schema, settings, registry.clone());
    executor.merge(&MergeCandidate { parts: snapshot })?;

    let output = read_all_rows(&registry)?;
    assert!(output.len() <= input_count);
    assert_eq!(10, output.len());

    Ok(())
}
