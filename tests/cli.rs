use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::prelude::*;
use rstest::*;

// 用 cat 作为特征提取命令：测试图片的内容就是它的特征向量
const EMBEDDER: &str = "cat";

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            cmd.env_remove("PICSIM_DIM")
                .env_remove("PICSIM_EMBEDDER")
                .env_remove("APP_DATA_DIR");
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

struct Workspace {
    conf: assert_fs::TempDir,
    data: assert_fs::TempDir,
}

#[fixture]
fn workspace() -> Workspace {
    let conf = assert_fs::TempDir::new().unwrap();
    let data = assert_fs::TempDir::new().unwrap();
    data.child("a.jpg").write_str("[1, 0, 0]").unwrap();
    data.child("sub/b.png").write_str("[0, 1, 0]").unwrap();
    data.child("sub/c.jpeg").write_str("[1, 1, 0]").unwrap();
    data.child("bad.png").write_str("garbage").unwrap();
    data.child("notes.txt").write_str("[0, 0, 1]").unwrap();
    Workspace { conf, data }
}

fn ingest(ws: &Workspace) -> Result<assert_cmd::assert::Assert> {
    Ok(cargo_run!(
        "picsim", "-c", ws.conf.path(), "ingest", "--dim", "3", "--embedder", EMBEDDER, "-d",
        ws.data.path(), "--no-progress"
    ))
}

#[rstest]
fn ingest_reports_failures(workspace: Workspace) -> Result<()> {
    ingest(&workspace)?
        .success()
        .stdout(predicate::str::contains("写入 3 张图片，未修改 0 张，失败 1 张"))
        .stderr(predicate::str::contains("[ERR]").and(predicate::str::contains("bad.png")));

    cargo_run!("picsim", "-c", workspace.conf.path(), "stats", "--dim", "3")
        .success()
        .stdout(predicate::str::contains("图片数量: 3"))
        .stdout(predicate::str::contains("数据库为空: false"));

    Ok(())
}

#[test]
fn stats_on_new_database() -> Result<()> {
    let conf = assert_fs::TempDir::new()?;

    cargo_run!("picsim", "-c", conf.path(), "stats", "--dim", "3")
        .success()
        .stdout(predicate::str::contains("向量维度: 3"))
        .stdout(predicate::str::contains("图片数量: 0"))
        .stdout(predicate::str::contains("数据库为空: true"));

    Ok(())
}

#[rstest]
fn ingest_twice_keeps_count(workspace: Workspace) -> Result<()> {
    ingest(&workspace)?.success();
    ingest(&workspace)?.success();

    cargo_run!("picsim", "-c", workspace.conf.path(), "stats", "--dim", "3")
        .success()
        .stdout(predicate::str::contains("图片数量: 3"));

    Ok(())
}

#[rstest]
fn search_table(workspace: Workspace) -> Result<()> {
    ingest(&workspace)?.success();
    workspace.conf.child("query.jpg").write_str("[2, 0, 0]")?;

    cargo_run!(
        "picsim", "-c", workspace.conf.path(), "search", "--dim", "3", "--embedder", EMBEDDER,
        "-d", workspace.data.path(), "-k", "2", workspace.conf.child("query.jpg").path()
    )
    .success()
    .stdout(predicate::str::starts_with("1.0000\ta.jpg\t"))
    .stdout(predicate::str::contains("0.7071\tsub/c.jpeg"))
    .stdout(predicate::str::contains("sub/b.png").not());

    Ok(())
}

#[rstest]
fn search_json(workspace: Workspace) -> Result<()> {
    ingest(&workspace)?.success();
    workspace.conf.child("query.jpg").write_str("[0, 1, 0]")?;

    let output = cargo_run!(
        "picsim", "-c", workspace.conf.path(), "search", "--dim", "3", "--embedder", EMBEDDER,
        "-d", workspace.data.path(), "-k", "10", "--output-format", "json",
        workspace.conf.child("query.jpg").path()
    )
    .success()
    .get_output()
    .stdout
    .clone();

    let rows: Vec<serde_json::Value> = serde_json::from_slice(&output)?;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["identifier"], "sub/b.png");
    assert!((rows[0]["score"].as_f64().unwrap() - 1.0).abs() < 1e-4);
    assert_eq!(rows[2]["identifier"], "a.jpg");
    assert!(rows[2]["score"].as_f64().unwrap().abs() < 1e-4);
    assert!(rows[0]["path"].as_str().unwrap().ends_with("b.png"));

    Ok(())
}

#[rstest]
fn search_rejects_wrong_dimension(workspace: Workspace) -> Result<()> {
    ingest(&workspace)?.success();
    workspace.conf.child("query.jpg").write_str("[1, 0]")?;

    cargo_run!(
        "picsim", "-c", workspace.conf.path(), "search", "--dim", "3", "--embedder", EMBEDDER,
        "-d", workspace.data.path(), workspace.conf.child("query.jpg").path()
    )
    .failure();

    Ok(())
}

#[rstest]
fn search_rejects_zero_k(workspace: Workspace) -> Result<()> {
    ingest(&workspace)?.success();
    workspace.conf.child("query.jpg").write_str("[1, 0, 0]")?;

    cargo_run!(
        "picsim", "-c", workspace.conf.path(), "search", "--dim", "3", "--embedder", EMBEDDER,
        "-d", workspace.data.path(), "-k", "0", workspace.conf.child("query.jpg").path()
    )
    .failure();

    Ok(())
}

#[rstest]
fn reopen_with_other_dimension_fails(workspace: Workspace) -> Result<()> {
    ingest(&workspace)?.success();

    cargo_run!("picsim", "-c", workspace.conf.path(), "stats", "--dim", "4").failure();

    Ok(())
}

#[rstest]
fn remove_image(workspace: Workspace) -> Result<()> {
    ingest(&workspace)?.success();

    cargo_run!("picsim", "-c", workspace.conf.path(), "remove", "--dim", "3", "sub/b.png")
        .success()
        .stdout(predicate::str::contains("已删除: sub/b.png"));
    cargo_run!("picsim", "-c", workspace.conf.path(), "remove", "--dim", "3", "sub/b.png")
        .success()
        .stdout(predicate::str::contains("图片不存在: sub/b.png"));
    cargo_run!("picsim", "-c", workspace.conf.path(), "stats", "--dim", "3")
        .success()
        .stdout(predicate::str::contains("图片数量: 2"));

    Ok(())
}

#[rstest]
fn resolve_identifier(workspace: Workspace) -> Result<()> {
    cargo_run!("picsim", "resolve", "-d", workspace.data.path(), "sub/b.png")
        .success()
        .stdout(predicate::str::contains("b.png"));
    cargo_run!("picsim", "resolve", "-d", workspace.data.path(), "../../etc/passwd").failure();
    cargo_run!("picsim", "resolve", "-d", workspace.data.path(), "/etc/passwd").failure();

    Ok(())
}

#[test]
fn ingest_empty_dir_fails() -> Result<()> {
    let conf = assert_fs::TempDir::new()?;
    let data = assert_fs::TempDir::new()?;
    data.child("readme.txt").write_str("nothing here")?;

    cargo_run!(
        "picsim", "-c", conf.path(), "ingest", "--dim", "3", "--embedder", EMBEDDER, "-d",
        data.path(), "--no-progress"
    )
    .failure()
    .stdout(predicate::str::contains("写入 0 张图片"));

    Ok(())
}

#[test]
fn ingest_missing_dir_fails() -> Result<()> {
    let conf = assert_fs::TempDir::new()?;

    cargo_run!(
        "picsim", "-c", conf.path(), "ingest", "--dim", "3", "--embedder", EMBEDDER, "-d",
        conf.path().join("missing"), "--no-progress"
    )
    .failure();

    Ok(())
}
