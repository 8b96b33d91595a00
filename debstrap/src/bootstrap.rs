use std::fs;

use log::info;
use types::DebstrapError;

use crate::{
    cmd::Cmd,
    context::{Context, Outcome},
};

/// A file only present once the base system has been bootstrapped
const MARKER: &str = "bin/bash";

/// Populates the target directory with a minimal base system
pub(crate) fn bootstrap(ctx: &mut Context, outcome: &mut Outcome) -> Result<(), DebstrapError> {
    let target = ctx.target().to_path_buf();

    if target.join(MARKER).exists() {
        outcome.msg(format!("Base system already present in {}", target.display()));
        return Ok(());
    }

    fs::create_dir_all(&target)?;

    let params = ctx.params();
    info!(
        "Bootstrapping {} {} from {} into {}",
        params.distribution,
        params.arch,
        params.mirror,
        target.display()
    );

    let cmd = Cmd::new("debootstrap")
        .arg(format!("--arch={}", params.arch.as_deb_str()))
        .arg(&params.distribution)
        .arg(&target)
        .arg(&params.mirror)
        .env("LC_ALL", "C");

    ctx.run(&cmd, outcome)?;
    outcome.change(format!(
        "Bootstrapped {} into {}",
        ctx.params().distribution,
        target.display()
    ));

    Ok(())
}

#[cfg(test)]
mod bootstrap_test {
    use test_log::test;
    use types::{Architecture, DebstrapError};

    use super::bootstrap;
    use crate::{context::Outcome, testing::TestEnv};

    #[test]
    fn test_bootstrap() {
        let mut env = TestEnv::new();
        env.params.arch = Architecture::Arm64;
        env.params.distribution = String::from("trixie");
        let mut ctx = env.context();

        let mut outcome = Outcome::default();
        bootstrap(&mut ctx, &mut outcome).unwrap();
        assert!(outcome.changed);

        assert_eq!(
            env.runner.command_lines(),
            vec![format!(
                "LC_ALL=C debootstrap --arch=arm64 trixie {} http://deb.debian.org/debian",
                env.target().display()
            )]
        );
    }

    #[test]
    fn test_already_bootstrapped() {
        let env = TestEnv::new();
        env.populate_target();
        let mut ctx = env.context();

        let mut outcome = Outcome::default();
        bootstrap(&mut ctx, &mut outcome).unwrap();
        assert!(!outcome.changed);
        assert!(env.runner.programs().is_empty());
    }

    #[test]
    fn test_failure() {
        let env = TestEnv::new();
        env.runner
            .state_mut()
            .failing
            .push(String::from("debootstrap"));
        let mut ctx = env.context();

        let err = bootstrap(&mut ctx, &mut Outcome::default()).unwrap_err();
        assert!(matches!(err, DebstrapError::CommandFailed { .. }));
    }
}
