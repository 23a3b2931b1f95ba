use super::*;

fn parse(args: &[&str]) -> CliCommand {
    let cli = Cli::try_parse_from(args).unwrap();
    cli.command
}

#[test]
fn cli_parse_run_single_job() {
    match parse(&["bex", "run", "home.toml"]) {
        CliCommand::Run { jobs, verify } => {
            assert_eq!(jobs, vec![PathBuf::from("home.toml")]);
            assert!(!verify);
        }
        _ => panic!("expected Run"),
    }
}

#[test]
fn cli_parse_run_multiple_jobs_with_verify() {
    match parse(&["bex", "run", "--verify", "a.toml", "b.toml"]) {
        CliCommand::Run { jobs, verify } => {
            assert_eq!(jobs.len(), 2);
            assert!(verify);
        }
        _ => panic!("expected Run"),
    }
}

#[test]
fn cli_parse_run_requires_a_job_file() {
    assert!(Cli::try_parse_from(["bex", "run"]).is_err());
}

#[test]
fn cli_parse_check() {
    match parse(&["bex", "check", "home.toml"]) {
        CliCommand::Check { job } => assert_eq!(job, PathBuf::from("home.toml")),
        _ => panic!("expected Check"),
    }
}

#[test]
fn cli_parse_config_path() {
    match parse(&["bex", "config-path"]) {
        CliCommand::ConfigPath => {}
        _ => panic!("expected ConfigPath"),
    }
}
