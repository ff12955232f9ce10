/// Execute an aggregate command in memory: decide, then evolve.
///
/// Used wherever a projected state is needed without persisting anything
/// (tests, dry runs). The persistent path goes through the infra
/// dispatcher, which additionally appends and publishes.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: tallyerp_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
