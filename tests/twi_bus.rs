use simvolt::twi::{
    TW_MRX_ADR_ACK, TW_MRX_DATA_NACK, TW_MTX_ADR_ACK, TW_MTX_ADR_NACK, TW_MTX_DATA_ACK,
    TW_NO_STATE, TW_SRX_ADR_ACK, TW_SRX_ADR_DATA_ACK, TW_SRX_STOP_RESTART, TW_START,
    TW_STX_ADR_ACK, TW_STX_DATA_NACK,
};
use simvolt::{Element, ElementId, SimConfig, SimContext, Simulator, TwiMode, TwiModule};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Master and slave sharing a pulled-up SDA/SCL pair, roles applied.
fn bus(slave_addr: u8) -> (Simulator, ElementId, ElementId) {
    let mut sim = Simulator::new(SimConfig::default());
    let sda = sim.add_node();
    let scl = sim.add_node();

    let (_, ctx) = sim.parts();
    let mut master = TwiModule::new();
    master.connect(&mut ctx.nodes, sda, scl);
    let mut slave = TwiModule::new();
    slave.connect(&mut ctx.nodes, sda, scl);
    slave.set_address(slave_addr);

    let master_id = sim.add_element(Element::Twi(master));
    let slave_id = sim.add_element(Element::Twi(slave));
    sim.start().unwrap();

    {
        let (s, ctx) = twi_mut(&mut sim, slave_id);
        s.set_pullups(&mut ctx.nodes, true);
        s.set_mode(ctx, TwiMode::Slave);
    }
    {
        let (m, ctx) = twi_mut(&mut sim, master_id);
        m.set_mode(ctx, TwiMode::Master);
    }
    (sim, master_id, slave_id)
}

fn twi_mut(sim: &mut Simulator, id: ElementId) -> (&mut TwiModule, &mut SimContext) {
    let (elements, ctx) = sim.parts();
    let Element::Twi(t) = &mut elements[id.0] else {
        unreachable!()
    };
    (t, ctx)
}

fn twi_state(sim: &Simulator, id: ElementId) -> u8 {
    let Element::Twi(t) = sim.element(id) else {
        unreachable!()
    };
    t.twi_state()
}

fn run_until(sim: &mut Simulator, max_steps: u32, done: impl Fn(&Simulator) -> bool) -> bool {
    for _ in 0..max_steps {
        sim.run_step();
        if done(sim) {
            return true;
        }
    }
    false
}

#[test]
fn master_writes_a_byte_to_a_matching_slave() {
    init_logs();
    let (mut sim, master, slave) = bus(0x50);

    twi_mut(&mut sim, master).0.master_start();
    assert!(
        run_until(&mut sim, 100, |s| twi_state(s, master) == TW_START),
        "start condition never reported"
    );

    twi_mut(&mut sim, master).0.master_write(0x50 << 1, true, true);
    assert!(
        run_until(&mut sim, 300, |s| twi_state(s, master) == TW_MTX_ADR_ACK),
        "address was not acknowledged"
    );
    assert_eq!(twi_state(&sim, slave), TW_SRX_ADR_ACK);

    twi_mut(&mut sim, master).0.master_write(0x42, false, false);
    assert!(
        run_until(&mut sim, 300, |s| twi_state(s, master) == TW_MTX_DATA_ACK),
        "data was not acknowledged"
    );
    {
        let (s, _) = twi_mut(&mut sim, slave);
        assert_eq!(s.take_byte(), Some(0x42));
        assert_eq!(s.twi_state(), TW_SRX_ADR_DATA_ACK);
    }

    twi_mut(&mut sim, master).0.master_stop();
    assert!(
        run_until(&mut sim, 300, |s| twi_state(s, master) == TW_NO_STATE),
        "stop never completed"
    );
    assert_eq!(twi_state(&sim, slave), TW_SRX_STOP_RESTART);
}

#[test]
fn mismatched_address_is_not_acknowledged() {
    init_logs();
    let (mut sim, master, slave) = bus(0x51);

    twi_mut(&mut sim, master).0.master_start();
    assert!(run_until(&mut sim, 100, |s| twi_state(s, master) == TW_START));

    // Addressing 0x50 on a bus whose only slave is 0x51.
    twi_mut(&mut sim, master).0.master_write(0x50 << 1, true, true);
    assert!(
        run_until(&mut sim, 300, |s| twi_state(s, master) == TW_MTX_ADR_NACK),
        "expected NACK for a foreign address"
    );
    assert_eq!(twi_state(&sim, slave), TW_NO_STATE);

    twi_mut(&mut sim, master).0.master_stop();
    assert!(run_until(&mut sim, 300, |s| twi_state(s, master) == TW_NO_STATE));
    // Never matched, so the slave does not report the stop.
    assert_eq!(twi_state(&sim, slave), TW_NO_STATE);
}

#[test]
fn master_reads_the_slave_tx_register() {
    init_logs();
    let (mut sim, master, slave) = bus(0x50);
    twi_mut(&mut sim, slave).0.set_tx_reg(0x37);

    twi_mut(&mut sim, master).0.master_start();
    assert!(run_until(&mut sim, 100, |s| twi_state(s, master) == TW_START));

    twi_mut(&mut sim, master).0.master_write(0x50 << 1 | 1, true, false);
    assert!(
        run_until(&mut sim, 300, |s| twi_state(s, master) == TW_MRX_ADR_ACK),
        "read address was not acknowledged"
    );
    assert_eq!(twi_state(&sim, slave), TW_STX_ADR_ACK);

    {
        let (m, ctx) = twi_mut(&mut sim, master);
        m.master_read(ctx, false); // single byte, answer NACK
    }
    assert!(
        run_until(&mut sim, 300, |s| twi_state(s, master) == TW_MRX_DATA_NACK),
        "read never completed"
    );
    {
        let (m, _) = twi_mut(&mut sim, master);
        assert_eq!(m.take_byte(), Some(0x37));
    }
    assert_eq!(twi_state(&sim, slave), TW_STX_DATA_NACK);

    twi_mut(&mut sim, master).0.master_stop();
    assert!(run_until(&mut sim, 300, |s| twi_state(s, master) == TW_NO_STATE));
}
