//! # engine_app — demo host
//!
//! Builds a small world of moving bodies, runs the cycle loop for a bounded
//! number of cycles and logs where the bodies ended up.
//!
//! Settings come from `ENGINE_WORKER_THREADS`, `ENGINE_CYCLE_RATE` and
//! `ENGINE_MAX_CYCLES`. Without a limit the demo stops after 120 cycles.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use engine_app::{Runtime, RuntimeConfig};
use engine_component::{Component, ComponentValue, Event, QueryDescriptor, Resource};
use engine_system::{AccessSignature, SystemConfig};

const DEMO_CYCLES: u64 = 120;

#[derive(Debug, Clone, Copy)]
struct Position {
    x: f32,
    y: f32,
}

impl Component for Position {
    fn type_name() -> &'static str {
        "Position"
    }
}

#[derive(Debug, Clone, Copy)]
struct Velocity {
    x: f32,
    y: f32,
}

impl Component for Velocity {
    fn type_name() -> &'static str {
        "Velocity"
    }
}

/// Sent when a body crosses the boundary.
#[derive(Debug, Clone)]
struct Escaped {
    x: f32,
    y: f32,
}

impl Event for Escaped {
    fn type_name() -> &'static str {
        "Escaped"
    }
}

/// Half-width of the square arena.
struct Bounds(f32);

impl Resource for Bounds {
    fn type_name() -> &'static str {
        "Bounds"
    }
}

fn main() -> Result<()> {
    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("engine_app=info".parse()?))
        .init();

    let mut config = RuntimeConfig::from_env()?;
    if config.max_cycles == 0 {
        config.max_cycles = DEMO_CYCLES;
    }
    info!(?config, "engine demo starting");

    let mut runtime = Runtime::new(config)?;
    runtime.register_component::<Position>()?;
    runtime.register_component::<Velocity>()?;
    runtime.register_event::<Escaped>()?;
    runtime.insert_resource(Bounds(50.0));

    for i in 0..16u8 {
        let angle = f32::from(i) * std::f32::consts::TAU / 16.0;
        runtime.world_mut().spawn([
            ComponentValue::new(Position { x: 0.0, y: 0.0 }),
            ComponentValue::new(Velocity {
                x: angle.cos() * (1.0 + f32::from(i % 4)),
                y: angle.sin() * (1.0 + f32::from(i % 4)),
            }),
        ])?;
    }

    runtime.add_system(
        SystemConfig::new(
            "move",
            AccessSignature::new().reads::<Velocity>().writes::<Position>(),
        ),
        |ctx| {
            let query = QueryDescriptor::new()
                .read(Velocity::component_type_id())
                .write(Position::component_type_id());
            ctx.query(query)?.for_each(|mut row| {
                let Some(v) = row.get::<Velocity>().copied() else {
                    return;
                };
                if let Some(p) = row.get_mut::<Position>() {
                    p.x += v.x;
                    p.y += v.y;
                }
            })?;
            Ok(())
        },
    )?;

    runtime.add_system(
        SystemConfig::new(
            "boundary",
            AccessSignature::new()
                .reads::<Position>()
                .reads_resource::<Bounds>()
                .sends::<Escaped>(),
        )
        .in_stage("post_update")
        .before("report_escapes"),
        |ctx| {
            let limit = ctx.resource::<Bounds>()?.map_or(f32::INFINITY, |bounds| bounds.0);
            let mut escaped = Vec::new();
            ctx.query(QueryDescriptor::new().read(Position::component_type_id()))?
                .for_each(|row| {
                    if let Some(p) = row.get::<Position>() {
                        if p.x.abs() > limit || p.y.abs() > limit {
                            escaped.push((row.entity(), *p));
                        }
                    }
                })?;
            for (entity, p) in escaped {
                ctx.send(Escaped { x: p.x, y: p.y })?;
                ctx.commands().destroy(entity);
            }
            Ok(())
        },
    )?;

    runtime.add_system(
        SystemConfig::new("report_escapes", AccessSignature::new().receives::<Escaped>())
            .in_stage("post_update"),
        |ctx| {
            for escaped in ctx.read_events::<Escaped>()? {
                info!(cycle = ctx.cycle(), x = escaped.x, y = escaped.y, "body escaped");
            }
            Ok(())
        },
    )?;

    let cycles = runtime.run()?;
    info!(
        cycles,
        remaining = runtime.world().entity_count(),
        archetypes = runtime.world().archetype_count(),
        "engine demo finished"
    );
    Ok(())
}
