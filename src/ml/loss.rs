use burn::prelude::*;

/// Added to the difference before taking the norm, so identical
/// vectors still have a differentiable distance.
pub const DISTANCE_EPS: f64 = 1e-6;

/// Lower bound on the norm when L2-normalising.
pub const NORMALIZE_EPS: f64 = 1e-12;

/// Scale applied to cosine similarities before the softmax.
pub const LOGIT_SCALE: f64 = 100.0;

/// ‖a − b + ε‖₂ per row: [batch, dim] → [batch]
pub fn pairwise_distance<B: Backend>(a: Tensor<B, 2>, b: Tensor<B, 2>) -> Tensor<B, 1> {
    let [batch, _] = a.dims();
    (a - b)
        .add_scalar(DISTANCE_EPS)
        .powf_scalar(2.0)
        .sum_dim(1)
        .sqrt()
        .reshape([batch])
}

/// mean(max(d(a, p) − d(a, n) + margin, 0))
pub fn triplet_margin_loss<B: Backend>(
    anchor:   Tensor<B, 2>,
    positive: Tensor<B, 2>,
    negative: Tensor<B, 2>,
    margin:   f64,
) -> Tensor<B, 1> {
    let d_pos = pairwise_distance(anchor.clone(), positive);
    let d_neg = pairwise_distance(anchor, negative);
    (d_pos - d_neg).add_scalar(margin).clamp_min(0.0).mean()
}

/// Scale each row to unit L2 norm.
pub fn l2_normalize<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let dims = x.dims();
    let norm = x.clone().powf_scalar(2.0).sum_dim(1).sqrt().clamp_min(NORMALIZE_EPS);
    x / norm.expand(dims)
}

/// softmax(100 · norm(img) · norm(txt)ᵀ) over the text axis: [n_img, n_txt]
pub fn similarity_probs<B: Backend>(image: Tensor<B, 2>, text: Tensor<B, 2>) -> Tensor<B, 2> {
    let logits = l2_normalize(image)
        .matmul(l2_normalize(text).transpose())
        .mul_scalar(LOGIT_SCALE);
    burn::tensor::activation::softmax(logits, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TB = NdArray;

    fn t(rows: &[[f32; 2]]) -> Tensor<TB, 2> {
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Tensor::<TB, 1>::from_floats(flat.as_slice(), &Default::default()).reshape([rows.len(), 2])
    }

    fn scalar(x: Tensor<TB, 1>) -> f32 {
        x.into_scalar()
    }

    #[test]
    fn test_distance_is_euclidean() {
        let d: Vec<f32> = pairwise_distance(t(&[[0.0, 0.0]]), t(&[[3.0, 4.0]]))
            .into_data()
            .to_vec()
            .unwrap();
        assert!((d[0] - 5.0).abs() < 1e-4);
    }

    #[test]
    fn test_collapsed_triplet_costs_the_margin() {
        let a = t(&[[1.0, 1.0]]);
        let loss = scalar(triplet_margin_loss(a.clone(), a.clone(), a, 0.5));
        assert!((loss - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_far_negative_costs_nothing() {
        let loss = scalar(triplet_margin_loss(
            t(&[[0.0, 0.0], [1.0, 0.0]]),
            t(&[[0.1, 0.0], [1.0, 0.1]]),
            t(&[[10.0, 0.0], [1.0, 10.0]]),
            1.0,
        ));
        assert_eq!(loss, 0.0);
    }

    #[test]
    fn test_loss_is_batch_mean() {
        // row 0: d_pos 0, d_neg 0 → margin 1; row 1: far negative → 0
        let loss = scalar(triplet_margin_loss(
            t(&[[0.0, 0.0], [0.0, 0.0]]),
            t(&[[0.0, 0.0], [0.0, 0.0]]),
            t(&[[0.0, 0.0], [9.0, 0.0]]),
            1.0,
        ));
        assert!((loss - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_normalize_unit_rows() {
        let n: Vec<f32> = l2_normalize(t(&[[3.0, 4.0], [0.0, 0.0]])).into_data().to_vec().unwrap();
        assert!((n[0] - 0.6).abs() < 1e-6);
        assert!((n[1] - 0.8).abs() < 1e-6);
        assert_eq!(&n[2..], &[0.0, 0.0]);
    }

    #[test]
    fn test_probs_rows_sum_to_one_and_prefer_match() {
        let img = t(&[[1.0, 0.0], [0.0, 1.0]]);
        let txt = t(&[[2.0, 0.1], [0.1, 3.0]]);
        let p: Vec<f32> = similarity_probs(img, txt).into_data().to_vec().unwrap();
        assert!((p[0] + p[1] - 1.0).abs() < 1e-5);
        assert!((p[2] + p[3] - 1.0).abs() < 1e-5);
        assert!(p[0] > 0.99 && p[3] > 0.99);
    }
}
