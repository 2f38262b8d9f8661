//! Purpose: Hold top-level CLI command dispatch for `linepool`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: `serve` validates, binds, opens the data file, and daemonizes in that
//! order, all before the runtime starts.

use super::*;

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "linepool", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_version_output();
            Ok(RunOutcome::ok())
        }
        Command::Send {
            addr,
            text,
            timeout,
        } => {
            let timeout = parse_duration(&timeout)?;
            if timeout.is_zero() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("--timeout must be greater than zero")
                    .with_hint("Use a duration like 5s."));
            }
            let reply = send_line(&addr, &text, timeout)?;
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(&reply)
                .and_then(|()| stdout.flush())
                .map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write reply")
                        .with_source(err)
                })?;
            Ok(RunOutcome::ok())
        }
        Command::Serve(args) => {
            let config = serve_config_from_args(args)?;
            serve::validate_config(&config)?;
            let listener = serve::bind_listener(config.bind)?;
            let gateway = linepool::server::build_gateway(&config.server)?;
            if config.daemon {
                serve::daemonize()?;
            }

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config, listener, gateway))?;
            Ok(RunOutcome::ok())
        }
    }
}
