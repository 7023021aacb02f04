pub mod variant_plot;
