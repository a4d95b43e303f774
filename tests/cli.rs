use std::process::{Command, Output};

use nix::unistd::Uid;

fn demoter(args: &[&str], max_time: Option<&str>, max_mem: Option<&str>) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_demoter"));
    cmd.args(args)
        .env_remove("RUST_LOG")
        .env_remove("MAX_TIME")
        .env_remove("MAX_MEM");
    if let Some(v) = max_time {
        cmd.env("MAX_TIME", v);
    }
    if let Some(v) = max_mem {
        cmd.env("MAX_MEM", v);
    }
    cmd.output().unwrap()
}

fn lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::to_owned)
        .collect()
}

#[test]
fn unprivileged_caller_gets_one_line() {
    if Uid::effective().is_root() {
        return;
    }
    let output = demoter(&["/bin/true"], Some("1000"), Some("65536"));

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = lines(&output.stderr);
    assert_eq!(stderr.len(), 1, "stderr = {:?}", stderr);
    assert!(stderr[0].starts_with("failed to drop privileges: "));
}

#[test]
fn clean_run_prints_usage() {
    if !Uid::effective().is_root() {
        return;
    }
    let output = demoter(&["/bin/true"], Some("1000"), Some("65536"));

    assert_eq!(output.status.code(), Some(0));
    assert!(output.stderr.is_empty(), "stderr = {:?}", lines(&output.stderr));
    let stdout = lines(&output.stdout);
    assert_eq!(stdout.len(), 2, "stdout = {:?}", stdout);
    assert!(stdout[0].starts_with("CPU time (milliseconds) "));
    assert!(stdout[1].starts_with("Memory (kilobytes) "));
    for line in &stdout {
        let n = line.rsplit(' ').next().unwrap();
        n.parse::<u64>().unwrap();
    }
}

#[test]
fn abnormal_exit_is_diagnosed() {
    if !Uid::effective().is_root() {
        return;
    }
    let output = demoter(&["/bin/sh", "-c", "exit 3"], Some("1000"), Some("65536"));

    assert_eq!(output.status.code(), Some(255));
    assert_eq!(lines(&output.stderr), ["Abnormal exit: exit code 3"]);
    assert_eq!(lines(&output.stdout).len(), 2);
}

#[test]
fn missing_program_is_one_line() {
    if !Uid::effective().is_root() {
        return;
    }
    let output = demoter(&["/nonexistent"], Some("1000"), Some("65536"));

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = lines(&output.stderr);
    assert_eq!(stderr.len(), 1, "stderr = {:?}", stderr);
    assert!(stderr[0].starts_with("failed to execute /nonexistent: "));
    assert_eq!(stderr[0].matches("os error").count(), 1);
}

#[test]
fn missing_max_time_is_one_line() {
    if !Uid::effective().is_root() {
        return;
    }
    let output = demoter(&["/bin/true"], None, Some("65536"));

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = lines(&output.stderr);
    assert_eq!(stderr.len(), 1, "stderr = {:?}", stderr);
    assert!(stderr[0].starts_with("MAX_TIME is not set"));
}

#[test]
fn missing_command_is_one_line() {
    if !Uid::effective().is_root() {
        return;
    }
    let output = demoter(&[], Some("1000"), Some("65536"));

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    assert_eq!(lines(&output.stderr), ["no command given"]);
}
