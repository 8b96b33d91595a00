use log::info;
use types::DebstrapError;

use crate::{
    cmd::Cmd,
    context::{Context, Outcome},
};

/// Keeps apt, dpkg and debconf from asking anything
const NONINTERACTIVE_ENV: [(&str, &str); 4] = [
    ("DEBIAN_FRONTEND", "noninteractive"),
    ("DEBCONF_NONINTERACTIVE_SEEN", "true"),
    ("APT_LISTCHANGES_FRONTEND", "none"),
    ("LC_ALL", "C"),
];

/// Where the packages get installed
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Scope {
    /// The machine we're running on
    Host,

    /// The system being installed, through chroot
    Target,
}

impl Scope {
    fn cmd(self, ctx: &Context, program: &str) -> Cmd {
        let root = match self {
            Self::Host => None,
            Self::Target => Some(ctx.target()),
        };

        Cmd::new(program).envs(&NONINTERACTIVE_ENV).maybe_chroot(root)
    }
}

/// Returns the installed version of a package, if it's installed
fn installed_version(
    ctx: &mut Context,
    scope: Scope,
    package: &str,
    outcome: &mut Outcome,
) -> Result<Option<String>, DebstrapError> {
    let cmd = scope
        .cmd(ctx, "dpkg-query")
        .args(["-W", "-f=${Status}\t${Version}\n", package]);

    // dpkg-query fails on packages it never heard of
    let output = ctx.run_unchecked(&cmd, outcome)?;
    if !output.success() {
        return Ok(None);
    }

    let (status, version) = output
        .stdout
        .trim()
        .split_once('\t')
        .unwrap_or((output.stdout.trim(), ""));

    Ok(if status.split_whitespace().last() == Some("installed") {
        Some(version.to_owned())
    } else {
        None
    })
}

/// Makes sure every package is installed, only calling the package manager
/// for the missing ones
pub(crate) fn ensure_installed<S: AsRef<str>>(
    ctx: &mut Context,
    packages: &[S],
    scope: Scope,
    refresh: bool,
    outcome: &mut Outcome,
) -> Result<(), DebstrapError> {
    if refresh {
        let cmd = scope.cmd(ctx, "apt-get").args(["-q", "update"]);
        ctx.run(&cmd, outcome)?;
    }

    for package in packages {
        let package = package.as_ref();

        if let Some(version) = installed_version(ctx, scope, package, outcome)? {
            outcome.msg(format!("{package} {version} already installed"));
            continue;
        }

        info!("Installing {package} ({scope:?})");

        let cmd = scope.cmd(ctx, "apt-get").args([
            "install",
            "-y",
            "-q",
            "-o",
            "Dpkg::Options::=--force-confdef",
            "-o",
            "Dpkg::Options::=--force-confold",
            package,
        ]);
        ctx.run(&cmd, outcome)?;

        outcome.change(format!("{package} installed"));
    }

    Ok(())
}
