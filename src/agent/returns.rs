/// Discounted return of every step: `G[T-1] = r[T-1]`, `G[t] = γ·G[t+1] + r[t]`.
///
/// Returns are left raw, without centering or scaling.
pub fn discounted_returns(rewards: &[f64], gamma: f64) -> Vec<f64> {
    let mut returns = vec![0.; rewards.len()];
    let mut running = 0.;
    for (t, reward) in rewards.iter().enumerate().rev() {
        running = running * gamma + reward;
        returns[t] = running;
    }
    returns
}
