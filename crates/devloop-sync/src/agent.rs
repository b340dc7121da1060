// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Command lines for the in-container sync agent.

/// Where the agent binary lives inside the container.
pub const DEFAULT_AGENT_PATH: &str = "/tmp/devloop-agent";

/// Version the injected agent must report.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Arguments for `<agent> sync upstream`.
#[derive(Debug, Clone, Default)]
pub struct UpstreamArgs<'a> {
	pub excludes: &'a [String],
	pub download_excludes: &'a [String],
	pub file_change_cmd: Option<&'a str>,
	pub file_change_args: &'a [String],
	pub dir_create_cmd: Option<&'a str>,
	pub dir_create_args: &'a [String],
	pub container_path: &'a str,
}

/// Arguments for `<agent> sync downstream`.
#[derive(Debug, Clone, Default)]
pub struct DownstreamArgs<'a> {
	pub excludes: &'a [String],
	pub throttle: Option<u64>,
	pub polling: bool,
	/// Watch only the top level of the container path.
	pub no_recursive_watch: bool,
	pub container_path: &'a str,
}

pub fn upstream_argv(agent: &str, args: &UpstreamArgs<'_>) -> Vec<String> {
	let mut argv = vec![agent.to_string(), "sync".into(), "upstream".into()];
	if cfg!(unix) {
		argv.push("--override-permissions".into());
	}
	for exclude in args.excludes.iter().chain(args.download_excludes) {
		argv.push("--exclude".into());
		argv.push(exclude.clone());
	}
	push_command(&mut argv, "filechange", args.file_change_cmd, args.file_change_args);
	push_command(&mut argv, "dircreate", args.dir_create_cmd, args.dir_create_args);
	argv.push(args.container_path.to_string());
	argv
}

pub fn downstream_argv(agent: &str, args: &DownstreamArgs<'_>) -> Vec<String> {
	let mut argv = vec![agent.to_string(), "sync".into(), "downstream".into()];
	if let Some(throttle) = args.throttle {
		argv.push("--throttle".into());
		argv.push(throttle.to_string());
	}
	if args.polling {
		argv.push("--polling".into());
	}
	for exclude in args.excludes {
		argv.push("--exclude".into());
		argv.push(exclude.clone());
	}
	if args.no_recursive_watch {
		argv.push("--recursive-watch=false".into());
	}
	argv.push(args.container_path.to_string());
	argv
}

/// `--<flag>cmd C [--<flag>args A]*`, skipped without a command.
fn push_command(argv: &mut Vec<String>, flag: &str, cmd: Option<&str>, args: &[String]) {
	let Some(cmd) = cmd.filter(|c| !c.is_empty()) else {
		return;
	};
	argv.push(format!("--{flag}cmd"));
	argv.push(cmd.to_string());
	for arg in args {
		argv.push(format!("--{flag}args"));
		argv.push(arg.clone());
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn strings(v: &[&str]) -> Vec<String> {
		v.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn test_upstream_argv() {
		let excludes = strings(&["node_modules"]);
		let download = strings(&["logs"]);
		let cmd_args = strings(&["-HUP", "1"]);
		let dir_args = strings(&["-R", "node"]);
		let argv = upstream_argv(
			DEFAULT_AGENT_PATH,
			&UpstreamArgs {
				excludes: &excludes,
				download_excludes: &download,
				file_change_cmd: Some("kill"),
				file_change_args: &cmd_args,
				dir_create_cmd: Some("chown"),
				dir_create_args: &dir_args,
				container_path: "/app",
			},
		);

		let mut expected = strings(&[DEFAULT_AGENT_PATH, "sync", "upstream"]);
		if cfg!(unix) {
			expected.push("--override-permissions".into());
		}
		expected.extend(strings(&[
			"--exclude",
			"node_modules",
			"--exclude",
			"logs",
			"--filechangecmd",
			"kill",
			"--filechangeargs",
			"-HUP",
			"--filechangeargs",
			"1",
			"--dircreatecmd",
			"chown",
			"--dircreateargs",
			"-R",
			"--dircreateargs",
			"node",
			"/app",
		]));
		assert_eq!(argv, expected);
	}

	#[test]
	fn test_file_change_args_need_command() {
		let cmd_args = strings(&["x"]);
		let argv = upstream_argv(
			"agent",
			&UpstreamArgs {
				file_change_args: &cmd_args,
				dir_create_cmd: Some(""),
				dir_create_args: &cmd_args,
				container_path: ".",
				..Default::default()
			},
		);
		assert!(!argv.contains(&"--filechangeargs".to_string()));
		assert!(!argv.iter().any(|a| a.starts_with("--dircreate")));
		assert_eq!(argv.last().map(String::as_str), Some("."));
	}

	#[test]
	fn test_downstream_argv() {
		let excludes = strings(&["tmp"]);
		let argv = downstream_argv(
			"agent",
			&DownstreamArgs {
				excludes: &excludes,
				throttle: Some(100),
				polling: true,
				no_recursive_watch: true,
				container_path: "/app",
			},
		);
		assert_eq!(
			argv,
			strings(&[
				"agent",
				"sync",
				"downstream",
				"--throttle",
				"100",
				"--polling",
				"--exclude",
				"tmp",
				"--recursive-watch=false",
				"/app"
			])
		);
	}
}
