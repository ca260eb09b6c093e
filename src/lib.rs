//! Workspace root package. Carries no library code of its own; it exists so
//! `tests/` can exercise the full `jobq-core` + `jobq-infra-sqlite` stack as
//! workspace-wide behavioural tests (see `SPEC_FULL.md` §8).
