use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;

use argh::FromArgs;
use capsule::config::{self, Config, ConfigError};
use exitcode::ExitCode;

#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "validate",
    description = "Validate target configs, then exit"
)]
pub struct Validate {
    #[argh(
        switch,
        description = "disable environment checks. that includes sink health checks"
    )]
    no_environment: bool,

    #[argh(
        option,
        short = 'c',
        description = "read configuration from one or more files"
    )]
    configs: Vec<PathBuf>,
}

impl Validate {
    pub fn run(&self) -> ExitCode {
        #[cfg(unix)]
        let color = std::io::stdout().is_terminal();
        #[cfg(not(unix))]
        let color = false;

        let mut fmt = Formatter::new(color);

        if self.configs.is_empty() {
            fmt.error("No config file paths");
            return exitcode::CONFIG;
        }

        let mut configs = Vec::with_capacity(self.configs.len());
        for path in &self.configs {
            match config::load_from_path(path) {
                Ok(config) => {
                    fmt.success(format!("Loaded {:?}", path));
                    configs.push(config);
                }
                Err(ConfigError::Invalid(errors)) => {
                    fmt.title(format!("Failed to load {:?}", path));
                    fmt.sub_error(errors);
                }
                Err(err) => {
                    fmt.title(format!("Failed to load {:?}", path));
                    fmt.sub_error([err]);
                }
            }
        }

        if configs.len() != self.configs.len() {
            return exitcode::CONFIG;
        }

        if self.no_environment {
            fmt.validated();
            return exitcode::OK;
        }

        let rt = match tokio::runtime::Builder::new_multi_thread()
            .enable_io()
            .enable_time()
            .build()
        {
            Ok(rt) => rt,
            Err(_) => return exitcode::CANTCREAT,
        };

        rt.block_on(async move {
            if validate_healthchecks(&configs, &mut fmt).await {
                fmt.validated();
                exitcode::OK
            } else {
                exitcode::CONFIG
            }
        })
    }
}

// We are running health checks in serial so it's easier for the users to
// parse which errors belong to which config.
async fn validate_healthchecks(configs: &[Config], fmt: &mut Formatter) -> bool {
    let mut validated = true;
    for config in configs {
        match config.sink.build().await {
            Ok((_sink, healthcheck)) => match healthcheck.await {
                Ok(()) => fmt.success("Sink health check"),
                Err(err) => {
                    validated = false;
                    fmt.error(format!("Sink health check failed: {}", err));
                }
            },
            Err(err) => {
                validated = false;
                fmt.error(format!("Build sink failed: {}", err));
            }
        }
    }

    validated
}

struct Formatter {
    /// Width of largest printed line
    max_line_width: usize,
    /// Can empty line be printed
    print_space: bool,
    color: bool,
    // Intros
    error_intro: &'static str,
    success_intro: &'static str,
}

impl Formatter {
    fn new(color: bool) -> Self {
        Self {
            max_line_width: 0,
            print_space: false,
            error_intro: if color {
                // red
                "\x1b[31mx\x1b[0m"
            } else {
                "x"
            },
            success_intro: if color {
                // green
                "\x1b[32m√\x1b[0m"
            } else {
                "√"
            },
            color,
        }
    }

    /// Final confirmation that validation process was successful.
    #[allow(clippy::print_stdout)]
    fn validated(&self) {
        println!("{:-^width$}", "", width = self.max_line_width);

        if self.color {
            // Coloring needs to be used directly so that print
            // infrastructure correctly determines length of the
            // "Validated". Otherwise, ansi escape coloring is
            // calculated into the length.
            println!(
                "{:>width$}",
                "\x1b[32mValidated\x1b[0m", // green
                width = self.max_line_width
            );
        } else {
            println!("{:>width$}", "Validated", width = self.max_line_width)
        }
    }

    /// Standalone line
    fn success(&mut self, msg: impl AsRef<str>) {
        self.print(format!("{} {}\n", self.success_intro, msg.as_ref()))
    }

    /// Standalone line
    fn error(&mut self, error: impl AsRef<str>) {
        self.print(format!("{} {}\n", self.error_intro, error.as_ref()))
    }

    /// Marks sub
    fn title(&mut self, title: impl AsRef<str>) {
        self.space();
        self.print(format!(
            "{}\n{:-<width$}\n",
            title.as_ref(),
            "",
            width = title.as_ref().len()
        ))
    }

    /// A list of errors that go with a title.
    fn sub_error<I: IntoIterator>(&mut self, errors: I)
    where
        I::Item: fmt::Display,
    {
        for error in errors {
            self.print(format!("{} {}\n", self.error_intro, error));
        }
        self.space();
    }

    /// Prints empty space if necessary.
    fn space(&mut self) {
        if self.print_space {
            self.print_space = false;
            #[allow(clippy::print_stdout)]
            {
                println!();
            }
        }
    }

    fn print(&mut self, print: impl AsRef<str>) {
        let width = print
            .as_ref()
            .lines()
            .map(|line| line.chars().count())
            .max()
            .unwrap_or(0);
        self.max_line_width = width.max(self.max_line_width);
        self.print_space = true;
        #[allow(clippy::print_stdout)]
        {
            print!("{}", print.as_ref())
        }
    }
}
