//! Default behavior registrations for the device library.

use std::sync::Once;

use ferrite_core::{registry, BehaviorKind, EntityKind, Factory, Registry};

use crate::bjt::BjtBehavior;
use crate::capacitor::CapacitorBehavior;
use crate::diode::DiodeBehavior;
use crate::inductor::InductorBehavior;
use crate::mosfet::MosfetBehavior;
use crate::resistor::ResistorBehavior;
use crate::sources::{
    CccsBehavior, CcvsBehavior, CurrentSourceBehavior, VccsBehavior, VcvsBehavior,
    VoltageSourceBehavior,
};
use crate::switch::{ISwitchBehavior, VSwitchBehavior};

static REGISTER: Once = Once::new();

/// Install the factories for every built-in device kind.
///
/// Idempotent; call once at startup before building simulations. After a
/// [`Registry::reset`](ferrite_core::Registry::reset) in tests, use
/// [`register_defaults_again`].
pub fn register_defaults() {
    REGISTER.call_once(register_defaults_again);
}

/// Unconditionally (re-)install the default factories.
pub fn register_defaults_again() {
    let mut reg = registry().write().expect("behavior registry poisoned");
    register_into(&mut reg);
}

/// Install the default factories into a registry the caller already
/// holds (useful when resetting under one lock in tests).
pub fn register_into(reg: &mut Registry) {
    reg.register(
        EntityKind::Resistor,
        Factory {
            covers: &[
                BehaviorKind::Temperature,
                BehaviorKind::Load,
                BehaviorKind::AcLoad,
                BehaviorKind::Noise,
            ],
            build: ResistorBehavior::build,
        },
    );
    reg.register(
        EntityKind::Capacitor,
        Factory {
            covers: &[
                BehaviorKind::Temperature,
                BehaviorKind::AcLoad,
                BehaviorKind::Transient,
            ],
            build: CapacitorBehavior::build,
        },
    );
    reg.register(
        EntityKind::Inductor,
        Factory {
            covers: &[
                BehaviorKind::Load,
                BehaviorKind::AcLoad,
                BehaviorKind::Transient,
            ],
            build: InductorBehavior::build,
        },
    );
    reg.register(
        EntityKind::Diode,
        Factory {
            covers: &[
                BehaviorKind::Temperature,
                BehaviorKind::Load,
                BehaviorKind::AcLoad,
                BehaviorKind::Transient,
                BehaviorKind::Noise,
            ],
            build: DiodeBehavior::build,
        },
    );
    reg.register(
        EntityKind::Bjt,
        Factory {
            covers: &[
                BehaviorKind::Temperature,
                BehaviorKind::Load,
                BehaviorKind::AcLoad,
                BehaviorKind::Transient,
                BehaviorKind::Noise,
            ],
            build: BjtBehavior::build,
        },
    );
    reg.register(
        EntityKind::Mosfet,
        Factory {
            covers: &[
                BehaviorKind::Temperature,
                BehaviorKind::Load,
                BehaviorKind::AcLoad,
                BehaviorKind::Transient,
                BehaviorKind::Noise,
                BehaviorKind::Accept,
            ],
            build: MosfetBehavior::build,
        },
    );
    reg.register(
        EntityKind::VSwitch,
        Factory {
            covers: &[
                BehaviorKind::Load,
                BehaviorKind::AcLoad,
                BehaviorKind::Accept,
            ],
            build: VSwitchBehavior::build,
        },
    );
    reg.register(
        EntityKind::ISwitch,
        Factory {
            covers: &[
                BehaviorKind::Load,
                BehaviorKind::AcLoad,
                BehaviorKind::Accept,
            ],
            build: ISwitchBehavior::build,
        },
    );
    reg.register(
        EntityKind::VoltageSource,
        Factory {
            covers: &[BehaviorKind::Load, BehaviorKind::AcLoad],
            build: VoltageSourceBehavior::build,
        },
    );
    reg.register(
        EntityKind::CurrentSource,
        Factory {
            covers: &[BehaviorKind::Load, BehaviorKind::AcLoad],
            build: CurrentSourceBehavior::build,
        },
    );
    reg.register(
        EntityKind::Vcvs,
        Factory {
            covers: &[BehaviorKind::Load, BehaviorKind::AcLoad],
            build: VcvsBehavior::build,
        },
    );
    reg.register(
        EntityKind::Vccs,
        Factory {
            covers: &[BehaviorKind::Load, BehaviorKind::AcLoad],
            build: VccsBehavior::build,
        },
    );
    reg.register(
        EntityKind::Cccs,
        Factory {
            covers: &[BehaviorKind::Load, BehaviorKind::AcLoad],
            build: CccsBehavior::build,
        },
    );
    reg.register(
        EntityKind::Ccvs,
        Factory {
            covers: &[BehaviorKind::Load, BehaviorKind::AcLoad],
            build: CcvsBehavior::build,
        },
    );
}
