// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::command_policy::{critical_pattern, is_expected_disconnect};
use super::*;
use yare::parameterized;

#[parameterized(
    reboot = { "reboot" },
    shutdown = { "shutdown" },
    poweroff = { "poweroff" },
    halt = { "halt" },
    init_zero = { "init 0" },
    init_six = { "init 6" },
    systemctl_reboot = { "systemctl reboot" },
    systemctl_poweroff = { "systemctl poweroff" },
    systemctl_halt = { "systemctl halt" },
    agent_update = { "curl -sSL https://example.com | sh -s agent update" },
    installer = { "bash ./install-agent.sh --force" },
    padded = { "  reboot  " },
)]
fn expected_disconnect_commands(cmd: &str) {
    assert!(is_expected_disconnect(cmd));
}

#[parameterized(
    uptime = { "uptime" },
    reboot_prefixed = { "echo reboot" },
    apt = { "apt update" },
)]
fn ordinary_commands_are_not_expected_disconnect(cmd: &str) {
    assert!(!is_expected_disconnect(cmd));
}

#[parameterized(
    rm_root = { "rm -rf /var/lib" },
    rm_home_tilde = { "rm -rf ~" },
    rm_home_var = { "rm -rf $HOME" },
    rm_glob = { "rm -rf *" },
    rm_dot = { "rm -rf ." },
    rm_fr = { "rm -fr /tmp/build" },
    rm_split_flags = { "rm -r -f scratch" },
    rm_long_flags = { "rm --recursive --force /srv/data" },
    rm_path_prefixed = { "/bin/rm -rf ." },
    rm_sudo = { "sudo rm -Rf /opt/app" },
    mkfs = { "mkfs.ext4 /dev/sda1" },
    dd = { "dd if=/dev/zero of=/dev/sda" },
    chmod_sweep = { "chmod -R 777 /etc" },
    chown_sweep = { "chown -R nobody /srv" },
    firewall_flush = { "iptables -F" },
    firewall_disable = { "ufw disable" },
    userdel = { "userdel deploy" },
    passwd_root = { "passwd root" },
    purge = { "apt-get purge nginx" },
    mask = { "systemctl mask sshd" },
    reboot = { "reboot" },
)]
fn critical_commands_are_gated(cmd: &str) {
    assert!(critical_pattern(cmd).is_some(), "{cmd} should be critical");
}

#[test]
fn benign_commands_pass_the_gate() {
    assert_eq!(critical_pattern("uptime"), None);
    assert_eq!(critical_pattern("df -h"), None);
    assert_eq!(critical_pattern("apt list --upgradable"), None);
}

#[test]
fn plain_rm_is_not_gated() {
    assert_eq!(critical_pattern("rm stale.lock"), None);
    assert_eq!(critical_pattern("rm -i notes.txt"), None);
    // "rm" only counts as the binary, not as a substring of another word.
    assert_eq!(critical_pattern("alarm -rf"), None);
}

#[test]
fn rm_flags_do_not_leak_across_shell_separators() {
    // The force flag belongs to the second command, not to rm.
    assert_eq!(critical_pattern("rm stale.lock && tar -cf out.tar ."), None);
    assert!(critical_pattern("tar -tf out.tar; rm -rf extracted").is_some());
}

#[test]
fn status_ordering_has_no_regression() {
    assert!(CommandStatus::Pending.rank() < CommandStatus::Running.rank());
    assert!(CommandStatus::Running.rank() < CommandStatus::Success.rank());
    assert_eq!(CommandStatus::Failed.rank(), CommandStatus::Aborted.rank());
}

#[test]
fn terminal_statuses() {
    assert!(!CommandStatus::Pending.is_terminal());
    assert!(!CommandStatus::Running.is_terminal());
    assert!(CommandStatus::Success.is_terminal());
    assert!(CommandStatus::Failed.is_terminal());
    assert!(CommandStatus::Aborted.is_terminal());
}
