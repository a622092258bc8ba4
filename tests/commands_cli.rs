use clap::Parser;
use clap::error::ErrorKind;
use insta::assert_snapshot;
use pretty_assertions::assert_eq;

#[derive(Debug, Default)]
struct FakeTerminalClient;

impl spa_sim::TerminalClient for FakeTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }
}

async fn run_with_parsed_args(
    args: spa_sim::Args,
    output_format: spa_sim::OutputFormat,
) -> anyhow::Result<String> {
    let mut output = Vec::new();
    let (command, config) = args.into_command_and_config()?;
    spa_sim::run_with_clients(
        command,
        &mut output,
        &FakeTerminalClient,
        config,
        output_format,
    )
    .await?;
    Ok(String::from_utf8(output)?)
}

async fn run_with_argv<const N: usize>(
    argv: [&str; N],
    output_format: spa_sim::OutputFormat,
) -> anyhow::Result<String> {
    let parsed_args = spa_sim::Args::try_parse_from(argv)?;
    run_with_parsed_args(parsed_args, output_format).await
}

fn json_lines(stdout: &str) -> anyhow::Result<Vec<serde_json::Value>> {
    stdout
        .lines()
        .map(|line| Ok(serde_json::from_str(line)?))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn scan_command_lists_registered_spas_first() -> anyhow::Result<()> {
    let stdout = run_with_argv(
        [
            "spa-sim",
            "--seed",
            "7",
            "--scan-interval",
            "1s",
            "scan",
            "--devices",
            "2",
            "--duration",
            "100ms",
        ],
        spa_sim::OutputFormat::Pretty,
    )
    .await?;

    let discoveries: Vec<&str> = stdout.lines().take(2).collect();
    assert_snapshot!(discoveries.join("\n"), @r"
    [0001] Spa_DD:00:00 AA:BB:CC:DD:00:00 rssi=-70
    [0002] Spa_DD:00:01 AA:BB:CC:DD:00:01 rssi=-70
    ");
    assert!(stdout.contains("Scan summary:"));
    assert!(stdout.contains("registered"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn scan_command_reports_every_tick_with_duplicates() -> anyhow::Result<()> {
    let args = spa_sim::Args::new(spa_sim::Command::Scan(
        spa_sim::ScanArgs::new(2, std::time::Duration::from_millis(1_050)).with_duplicates(),
    ))
    .with_seed(3)
    .with_scan_interval(std::time::Duration::from_millis(100))
    .with_scan_error_probability(0.0);

    let stdout = run_with_parsed_args(args, spa_sim::OutputFormat::Json).await?;
    let lines = json_lines(&stdout)?;

    let (summary, records) = lines.split_last().expect("summary line should be present");
    assert_eq!(12, records.len());
    assert!(records.iter().all(|record| record["event"] == "discovered"));
    assert_eq!(2, summary["registered"]);
    assert_eq!(12, summary["discoveries"]);
    assert_eq!(0, summary["errors"]);

    Ok(())
}

#[tokio::test]
async fn scan_command_requires_at_least_one_device() {
    let result = run_with_argv(
        ["spa-sim", "scan", "--devices", "0"],
        spa_sim::OutputFormat::Pretty,
    )
    .await;

    let error = result.expect_err("zero devices should be rejected");
    assert_eq!("at least one simulated device is required", error.to_string());
}

#[tokio::test(start_paused = true)]
async fn session_command_pairs_and_sets_the_temperature() -> anyhow::Result<()> {
    let stdout = run_with_argv(
        [
            "spa-sim",
            "session",
            "--mac",
            "AA:BB:CC:DD:EE:10",
            "--code",
            "0123456789ABCDEF",
            "--password",
            "secret",
            "--temperature",
            "37.5",
            "--mtu",
            "8",
        ],
        spa_sim::OutputFormat::Pretty,
    )
    .await?;

    assert!(stdout.starts_with("Session:"));
    for expected in [
        "AA:BB:CC:DD:EE:10",
        "Spa_DD:EE:10",
        "37.5",
        "F → M",
        "Relay events:",
        "state_change MMODE=M",
        "state_change TEMPERATURE=37.5",
    ] {
        assert!(stdout.contains(expected), "missing {expected:?} in\n{stdout}");
    }

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn session_command_json_reports_mode_and_frames() -> anyhow::Result<()> {
    let stdout = run_with_argv(
        ["spa-sim", "session", "--code", "1234", "--temperature", "36"],
        spa_sim::OutputFormat::Json,
    )
    .await?;

    let lines = json_lines(&stdout)?;
    assert_eq!(1, lines.len());
    let report = &lines[0];
    assert_eq!("M", report["mode"]);
    assert_eq!("36", report["temperature"]);
    assert_eq!(23, report["mtu"]);
    assert_eq!(9, report["characteristics"]);
    assert_eq!(2, report["frames_written"]);
    assert_eq!("AA:BB:CC:DD:EE:FF", report["device"]["id"]);

    Ok(())
}

#[tokio::test]
async fn session_command_rejects_short_codes_with_a_password() {
    let result = run_with_argv(
        ["spa-sim", "session", "--code", "1234", "--password", "pw"],
        spa_sim::OutputFormat::Pretty,
    )
    .await;

    let error = result.expect_err("short code should be rejected");
    assert!(error.to_string().starts_with("master code must be"));
}

#[test]
fn mtu_must_be_numeric() {
    let result =
        spa_sim::Args::try_parse_from(["spa-sim", "session", "--code", "1", "--mtu", "big"]);

    let error = result.expect_err("non-numeric MTU should fail argument parsing");
    assert_eq!(ErrorKind::ValueValidation, error.kind());
}
