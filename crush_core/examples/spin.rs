use std::sync::Arc;

use crush_core::{
    AccountId, Arcade, GameConfig, MemoryLedger, MemorySnapshotStore, ProvablyFairRng, Settlement,
};

#[tokio::main]
async fn main() {
    // Seeded end-to-end round of each game against an in-memory ledger
    let rng = ProvablyFairRng::new("example-server-seed", "example-client-seed", 1);
    println!("server_seed_hash={}", rng.server_seed_hash_hex());

    let account = AccountId::new("demo");
    let ledger = Arc::new(MemoryLedger::with_account(&account, 1000));
    let arcade = Arcade::with_rng(
        GameConfig::default(),
        ledger,
        MemorySnapshotStore::new(),
        Box::new(rng),
    )
    .expect("default config is valid");
    arcade.sign_in(account);

    let report = arcade.spin(10).await.expect("spin");
    for row in report.grid.as_rows() {
        let labels: Vec<_> = row.iter().map(|key| key.label()).collect();
        println!("{}", labels.join(" "));
    }
    println!(
        "lines={} reward={} balance={}",
        report.result.lines.len(),
        report.result.reward,
        report.balance
    );

    let tower = arcade.start_tower(10, None).await.expect("tower");
    println!("tower commitment={}", tower.commitment);
    loop {
        let pick = arcade.pick(0).await.expect("pick");
        println!(
            "row {} -> {:?}, potential {}",
            pick.tower.history.len() - 1,
            pick.outcome,
            pick.tower.potential_payout
        );
        if let Some(settlement) = pick.settlement {
            println!("settled: {settlement:?}");
            break;
        }
        if pick.tower.active_row >= 3 {
            let cashout = arcade.cashout().await.expect("cashout");
            if let Settlement::Credited { amount, balance } = cashout.settlement {
                println!("cashed out {amount}, balance {balance}");
            }
            break;
        }
    }
}
